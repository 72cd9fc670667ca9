//! Length-stratified block shuffle
//!
//! Items are sorted by length and cut into `floor(n / batch_size)` contiguous
//! blocks. Block order is permuted while each block keeps its members, so a
//! batch holds similar-length sentences but batches arrive in random order.
//! The remainder (the longest items) is appended unshuffled.

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `items` in length-sorted blocks of `batch_size`
pub fn block_shuffle<T, F, R>(items: &[T], batch_size: usize, len_of: F, rng: &mut R) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> usize,
    R: Rng + ?Sized,
{
    let mut sorted: Vec<T> = items.to_vec();
    // stable, so equal lengths keep their incoming order
    sorted.sort_by_key(|item| len_of(item));

    if batch_size == 0 {
        return sorted;
    }

    let num_blocks = sorted.len() / batch_size;
    let mut block_order: Vec<usize> = (0..num_blocks).collect();
    block_order.shuffle(rng);

    let mut shuffled = Vec::with_capacity(sorted.len());
    for block in block_order {
        shuffled.extend_from_slice(&sorted[block * batch_size..(block + 1) * batch_size]);
    }
    shuffled.extend_from_slice(&sorted[num_blocks * batch_size..]);
    shuffled
}
