use anyhow::Result;

/// Unwrap a spawned worker's `JoinHandle<Result<T, E>>` into `Result<T>`.
///
/// Handles the two-level Result structure returned by awaiting the handle:
/// - `Ok(Ok(value))` - Task completed successfully with a success result
/// - `Ok(Err(e))` - Task completed but the work inside failed
/// - `Err(join_err)` - Task panicked or was cancelled
///
/// The panic_context parameter provides additional context for task panic errors.
pub async fn unwrap_worker_task<T, E>(
    handle: tokio::task::JoinHandle<std::result::Result<T, E>>,
    panic_context: &str,
) -> Result<T>
where
    T: Send + 'static,
    E: Into<anyhow::Error>,
{
    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(join_err) => Err(anyhow::Error::from(join_err).context(panic_context.to_string())),
    }
}
