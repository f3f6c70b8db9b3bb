//! Fixed-size batching for per-vehicle fan-out.

/// Default number of vehicles handled concurrently.
pub const BATCH_SIZE: usize = 10;

/// Ceiling on task handles per describe/wait call.
pub const WAIT_CHUNK_SIZE: usize = 100;

/// Ceiling on keys per object deletion call.
pub const DELETE_CHUNK_SIZE: usize = 1000;

/// Splits `items` into consecutive batches of at most `size` elements.
///
/// Order is preserved and only the last batch may be short. A size of 0 is
/// treated as 1.
pub fn batches<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.max(1))
}
