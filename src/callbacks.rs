//! Shared callback shapes for the per-file and batch uploaders (spec
//! §4.3/§4.4). Kept as boxed trait objects rather than generics so
//! callers can build an options struct without naming a concrete
//! closure type.

use crate::error::ErrorContext;
use futures::future::BoxFuture;

/// `onProgress(fraction)`. Not awaited, fire-and-forget, matching the
/// spec's description of progress as a pure notification.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// `onError(error, ctx) -> retry?`. Resolving `true` retries the failed
/// operation; `false` (or no callback at all) aborts. Receives the
/// error's rendered message rather than the error itself so the future
/// it returns can be `'static` without borrowing it.
pub type ErrorCallback = Box<dyn Fn(String, ErrorContext) -> BoxFuture<'static, bool> + Send + Sync>;

/// Runs `op` with retry governed by `on_error`: on failure, the callback
/// is awaited with the error's message and an `ErrorContext` for this
/// attempt; a `true` result retries `op` (with the next attempt number),
/// anything else propagates the original error.
pub async fn with_retry<Rv, F, Fut>(
    phase: crate::error::Phase,
    block_num: Option<u64>,
    on_error: &Option<ErrorCallback>,
    mut op: F,
) -> crate::error::Result<Rv>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<Rv>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let mut ctx = ErrorContext::new(phase, attempt);
                if let Some(block_num) = block_num {
                    ctx = ctx.with_block(block_num);
                }
                let should_retry = match on_error {
                    Some(cb) => cb(err.to_string(), ctx).await,
                    None => false,
                };
                if !should_retry {
                    log::warn!("{} failed on attempt {}, aborting: {}", phase, attempt, err);
                    return Err(err);
                }
                log::debug!("{} failed on attempt {}, retrying: {}", phase, attempt, err);
                attempt += 1;
            }
        }
    }
}
