//! Best-effort filesystem teardown

use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::retry::RetryPolicy;

/// Recursively delete `path`, retrying on failure.
///
/// Files held open by a scanner or a child that has not finished exiting
/// make removal fail transiently, so each failure is logged and retried
/// according to `policy`. Never returns an error: the result is `true` when
/// the directory is gone, `false` when every attempt failed.
pub async fn remove_dir_with_retry(path: &Path, policy: RetryPolicy) -> bool {
    let attempts = policy.attempts.max(1);

    let outcome = policy
        .run(
            move |attempt| async move {
                match tokio::fs::remove_dir_all(path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(e) => {
                        if attempt < attempts {
                            warn!(
                                "Failed to delete directory {} because of error {}. Will try again {} more time(s).",
                                path.display(),
                                e,
                                attempts - attempt
                            );
                        }
                        Err(e)
                    }
                }
            },
            |result: &io::Result<()>| result.is_ok(),
        )
        .await;

    match outcome {
        Ok(_) => {
            debug!("Deleted directory {}", path.display());
            true
        }
        Err(exhausted) => {
            let error = exhausted.last.err().map(|e| e.to_string()).unwrap_or_default();
            warn!(
                "Giving up trying to delete directory {} after {} attempts. Most recent error was: {}",
                path.display(),
                exhausted.attempts,
                error
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_removes_populated_directory() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("project");
        std::fs::create_dir_all(target.join("bin/Debug")).unwrap();
        std::fs::write(target.join("bin/Debug/app.dll"), b"binary").unwrap();

        let removed = remove_dir_with_retry(&target, RetryPolicy::new(10, Duration::from_millis(10))).await;

        assert!(removed);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_counts_as_removed() {
        let tmp = TempDir::new().unwrap();
        let removed = remove_dir_with_retry(&tmp.path().join("never-created"), RetryPolicy::immediate(10)).await;
        assert!(removed);
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn test_gives_up_without_error_after_all_attempts() {
        let tmp = TempDir::new().unwrap();
        // A regular file cannot be removed as a directory, so every attempt fails
        let target = tmp.path().join("locked");
        std::fs::write(&target, b"not a directory").unwrap();

        let start = tokio::time::Instant::now();
        let removed = remove_dir_with_retry(&target, RetryPolicy::new(10, Duration::from_secs(3))).await;

        assert!(!removed);
        assert!(target.exists());
        assert!(start.elapsed() >= Duration::from_secs(27));
    }
}
