use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry for the two idempotent upstream paths (OIDC discovery, LDAP
/// service bind): one retry, short pause. Everything else propagates without
/// retrying.
pub(crate) async fn with_one_retry<T, E, F, Fut>(label: &'static str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(op = label, error = %first, "Transient failure, retrying once");
            tokio::time::sleep(Duration::from_millis(250)).await;
            op().await
        },
    }
}
