//! Gradient clipping by global norm
//!
//! The norm is taken over all gradients of the module at once:
//! `norm = sqrt(sum_p ||g_p||^2)`. When it exceeds `max_norm`, every
//! gradient is scaled by `max_norm / norm`, which keeps the relative
//! magnitudes across parameters.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};

struct SquaredNorm<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    total: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let squared: f64 = grad.powf_scalar(2.0).sum().into_scalar().elem();
            self.total += squared;
        }
    }
}

struct Rescale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    factor: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.factor));
        }
    }
}

/// Global L2 norm of the gradients registered for `module`'s parameters
pub fn global_grad_norm<B, M>(module: &M, grads: &GradientsParams) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = SquaredNorm::<B> {
        grads,
        total: 0.0,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    visitor.total.sqrt()
}

/// Clip gradients to `max_norm`; returns the gradients and the norm before clipping
pub fn clip_grad_norm<B, M>(module: &M, mut grads: GradientsParams, max_norm: f64) -> (GradientsParams, f64)
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let norm = global_grad_norm::<B, M>(module, &grads);

    if norm > max_norm {
        let mut visitor = Rescale::<B> {
            grads: &mut grads,
            factor: max_norm / norm,
            _backend: PhantomData,
        };
        module.visit(&mut visitor);
    }

    (grads, norm)
}
