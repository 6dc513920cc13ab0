use crate::error::CryptoError;

/// Run a CPU-bound closure on tokio's blocking pool and await its result.
pub(crate) async fn offload<T, F>(f: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offload_returns_closure_result() {
        let value = offload(|| Ok(41 + 1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn offload_propagates_closure_error() {
        let result: Result<(), _> =
            offload(|| Err(CryptoError::InvalidInput("nope".into()))).await;
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn offload_maps_panic_to_task_error() {
        let result: Result<(), _> = offload(|| panic!("worker blew up")).await;
        assert!(matches!(result, Err(CryptoError::Task(_))));
    }
}
