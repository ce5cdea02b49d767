use crate::{DeferredLogger, Logger, PagedReader, ReadError};
use anyhow::{Result, bail};
use tracing::trace;

/// Runs a synchronous decoder against data that may not be loaded yet.
///
/// `f` is called repeatedly. Each time it fails with [`ReadError::NotLoaded`] from one of
/// `readers`, the missing range is fetched and `f` is run again from the start. Any other result
/// is returned as-is. `f` must therefore build its result from scratch on every call and must not
/// mutate shared state before it returns.
///
/// Messages that `f` sends to the logger it is given are held back and forwarded to `logger` only
/// from the final, successful attempt.
pub async fn with_load_scope<T>(
    readers: &[&PagedReader],
    logger: &dyn Logger,
    mut f: impl FnMut(&dyn Logger) -> Result<T>,
) -> Result<T> {
    loop {
        let attempt_logger = DeferredLogger::new();
        let e = match f(&attempt_logger) {
            Ok(value) => {
                attempt_logger.flush(logger);
                return Ok(value);
            }
            Err(e) => e,
        };

        let Some(&ReadError::NotLoaded {
            source,
            offset,
            len,
        }) = e.downcast_ref::<ReadError>()
        else {
            attempt_logger.flush(logger);
            return Err(e);
        };

        let Some(reader) = readers.iter().find(|r| r.source_id() == source) else {
            bail!("data not loaded from a reader outside this load scope: {e}");
        };

        trace!(offset, len, "load scope: fetching and retrying");
        reader.ensure_loaded(offset, len).await?;
    }
}
