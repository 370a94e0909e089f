//! Engine-wide constants (spec §4.3/§4.4/§9). Not user-configurable at
//! the per-file level by design, see `BLOCK_CONCURRENCY`'s doc comment.

/// In-flight block uploads per file. Spec §4.3 Phase 4: "value fixed; do
/// not make configurable at this level, the batch uploader has its own
/// concurrency."
pub const BLOCK_CONCURRENCY: usize = 3;

pub const BATCH_CONCURRENCY_MIN: usize = 1;
pub const BATCH_CONCURRENCY_MAX: usize = 10;
pub const BATCH_CONCURRENCY_DEFAULT: usize = 3;

/// Clamps a requested batch concurrency into `[1, 10]` (spec §4.4).
pub fn clamp_batch_concurrency(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(BATCH_CONCURRENCY_DEFAULT)
        .clamp(BATCH_CONCURRENCY_MIN, BATCH_CONCURRENCY_MAX)
}
