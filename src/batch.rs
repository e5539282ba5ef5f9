//! Batch splitter.

/// Split `items` into contiguous slices of at most `batch_size` elements.
///
/// Order is preserved and every item lands in exactly one batch. An empty
/// input yields no batches. `batch_size` of zero is treated as one.
pub fn split_batches<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    let batches: Vec<&[T]> = items.chunks(batch_size.max(1)).collect();
    tracing::debug!(
        total = items.len(),
        batches = batches.len(),
        batch_size,
        "split request into batches"
    );
    batches
}
