//! Exponential moving average of model parameters
//!
//! The teacher is never touched by the optimizer. After every student step
//! its parameters move toward the student's:
//!
//! `teacher = alpha_t * teacher + (1 - alpha_t) * student`
//!
//! Parameters are matched by [`ParamId`], so the teacher must start as a
//! clone of the student. Nothing here depends on the scorer architecture.

use std::collections::HashMap;

use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, ParamId},
    tensor::{backend::Backend, Tensor},
};

/// Flattened, detached copies of a module's float parameters keyed by id
pub struct NamedParameters<B: Backend> {
    tensors: HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> NamedParameters<B> {
    /// Snapshot every float parameter of `module`
    pub fn collect<M: Module<B>>(module: &M) -> Self {
        let mut collector = Collector {
            tensors: HashMap::new(),
        };
        module.visit(&mut collector);
        Self {
            tensors: collector.tensors,
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.tensors.contains_key(id)
    }
}

struct Collector<B: Backend> {
    tensors: HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for Collector<B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        let numel = tensor.shape().num_elements();
        self.tensors
            .insert(id, tensor.clone().detach().reshape([numel]));
    }
}

/// Outcome of one EMA update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmaStats {
    /// Parameters blended with their source counterpart
    pub updated: usize,
    /// Target parameters with no counterpart (left unchanged)
    pub missing: usize,
}

struct EmaMapper<'a, B: Backend> {
    source: &'a NamedParameters<B>,
    decay: f64,
    stats: EmaStats,
}

impl<B: Backend> ModuleMapper<B> for EmaMapper<'_, B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(source) = self.source.tensors.get(&id) else {
            self.stats.missing += 1;
            return tensor;
        };
        self.stats.updated += 1;
        let source = source.clone().reshape(tensor.dims());
        tensor
            .detach()
            .mul_scalar(self.decay)
            .add(source.mul_scalar(1.0 - self.decay))
    }
}

/// Blend `source` into `target` with weight `decay` on the target
pub fn apply_ema<B: Backend, M: Module<B>>(
    target: M,
    source: &NamedParameters<B>,
    decay: f64,
) -> (M, EmaStats) {
    let mut mapper = EmaMapper {
        source,
        decay,
        stats: EmaStats::default(),
    };
    let target = target.map(&mut mapper);
    (target, mapper.stats)
}

/// Ramped EMA decay: `alpha * exp(-5 * (1 - min(step, R) / R)^2)`.
///
/// Starts at `alpha * e^-5` and reaches `alpha` once `step >= rampup_steps`.
/// With `rampup_steps == 0` the full `alpha` is used immediately.
pub fn rampup_decay(step: usize, rampup_steps: usize, alpha: f64) -> f64 {
    if rampup_steps == 0 {
        return alpha;
    }
    let progress = step.min(rampup_steps) as f64 / rampup_steps as f64;
    let remaining = 1.0 - progress;
    alpha * (-5.0 * remaining * remaining).exp()
}
