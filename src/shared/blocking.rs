//! Usage: Run blocking work (SQLite) on the tokio blocking pool with a stable label.

use crate::shared::error::{AppError, AppResult, ErrorKind};

pub(crate) async fn run<T, E>(
    label: &'static str,
    f: impl FnOnce() -> Result<T, E> + Send + 'static,
) -> AppResult<T>
where
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(join_err) => {
            // Panic payloads may echo stored values, so only the label is reported.
            if join_err.is_panic() {
                tracing::error!(label, "blocking task panicked");
                return Err(AppError::new(
                    ErrorKind::Internal,
                    format!("{label}: task panicked"),
                ));
            }

            tracing::warn!(label, "blocking task cancelled");
            Err(AppError::new(
                ErrorKind::Internal,
                format!("{label}: task cancelled"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_returns_closure_result() {
        let value = run("test_ok", || Ok::<_, AppError>(41 + 1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn run_maps_closure_error() {
        let err = run("test_err", || Err::<(), _>(AppError::storage("locked")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn run_hides_panic_payload() {
        let err = run("test_panic", || -> Result<(), AppError> {
            panic!("secret-token-value")
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.to_string().contains("secret-token-value"));
        assert!(err.to_string().contains("test_panic"));
    }
}
