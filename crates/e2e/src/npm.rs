//! npm package restore for SPA templates

use std::path::Path;

use harness_common::{ProcessRun, ProcessSpec, RetryPolicy};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::NpmConfig;
use crate::error::{E2eError, E2eResult};

/// Runs package-manager commands; installs are serialized process-wide
/// because parallel installs on one machine corrupt the shared cache.
#[derive(Debug)]
pub struct Npm {
    command: String,
    restore_attempts: u32,
    install_gate: Mutex<()>,
}

impl Npm {
    pub fn new(config: &NpmConfig) -> Self {
        Self {
            command: config.command.clone(),
            restore_attempts: config.restore_attempts,
            install_gate: Mutex::new(()),
        }
    }

    /// `install` with retries.
    ///
    /// Installs fail sporadically (EPERM while scanning directories), so a
    /// failed attempt removes the half-populated `node_modules` and tries
    /// again. When every attempt fails the last failing run is returned
    /// rather than an error; the caller decides how to report it.
    pub async fn restore_with_retry(&self, working_dir: &Path) -> E2eResult<ProcessRun> {
        let attempts = self.restore_attempts.max(1);

        let outcome = RetryPolicy::immediate(attempts)
            .run(
                move |attempt| async move {
                    let run = self.restore(working_dir).await?;
                    if !run.succeeded() {
                        warn!(
                            "NPM restore in {} failed on attempt {} of {}. Error was: {}",
                            working_dir.display(),
                            attempt,
                            attempts,
                            run.formatted_output()
                        );
                        clean_node_modules(working_dir).await;
                    }
                    Ok::<_, E2eError>(run)
                },
                // Spawn failures are not transient; stop on them as well
                |result: &E2eResult<ProcessRun>| !matches!(result, Ok(run) if !run.succeeded()),
            )
            .await;

        match outcome {
            Ok(result) => result,
            Err(exhausted) => {
                warn!(
                    "Giving up attempting NPM restore in {} after {} attempts.",
                    working_dir.display(),
                    exhausted.attempts
                );
                exhausted.last
            }
        }
    }

    /// Run `<npm> run <script>` and wait for it to exit
    pub async fn run_script(&self, working_dir: &Path, script: &str) -> E2eResult<ProcessRun> {
        let run = ProcessSpec::shell(working_dir, &format!("{} run {}", self.command, script)).start()?;
        run.exited().await;
        Ok(run)
    }

    async fn restore(&self, working_dir: &Path) -> E2eResult<ProcessRun> {
        let _guard = self.install_gate.lock().await;

        info!("Restoring NPM packages in '{}' using npm...", working_dir.display());
        let run = ProcessSpec::shell(working_dir, &format!("{} install", self.command)).start()?;
        run.exited().await;
        Ok(run)
    }
}

async fn clean_node_modules(working_dir: &Path) {
    let node_modules = working_dir.join("node_modules");
    if !node_modules.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(&node_modules).await {
        warn!("Failed to clean up node_modules folder at {}: {}", node_modules.display(), e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Stand-in package manager that records each call and exits with `code`
    fn fake_npm(dir: &Path, code: i32) -> String {
        let script = dir.join("fake-npm");
        std::fs::write(
            &script,
            format!(
                "echo \"$@\" >> \"{log}\"\nmkdir -p node_modules/partial\nexit {code}\n",
                log = dir.join("calls.log").display()
            ),
        )
        .unwrap();
        format!("sh {}", script.display())
    }

    fn npm(command: String) -> Npm {
        Npm::new(&NpmConfig {
            command,
            restore_attempts: 3,
        })
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    #[tokio::test]
    async fn test_persistent_failure_returns_last_result_after_three_attempts() {
        let tools = TempDir::new().unwrap();
        let app = TempDir::new().unwrap();
        let npm = npm(fake_npm(tools.path(), 1));

        let run = npm.restore_with_retry(app.path()).await.unwrap();

        assert_eq!(run.exit_code(), Some(1));
        assert_eq!(calls(tools.path()), vec!["install"; 3]);
        assert!(!app.path().join("node_modules").exists());
    }

    #[tokio::test]
    async fn test_success_stops_retrying() {
        let tools = TempDir::new().unwrap();
        let app = TempDir::new().unwrap();
        let npm = npm(fake_npm(tools.path(), 0));

        let run = npm.restore_with_retry(app.path()).await.unwrap();

        assert!(run.succeeded());
        assert_eq!(calls(tools.path()).len(), 1);
        assert!(app.path().join("node_modules/partial").exists());
    }

    #[tokio::test]
    async fn test_concurrent_restores_never_overlap() {
        let tools = TempDir::new().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let script = tools.path().join("slow-npm");
        std::fs::write(
            &script,
            format!(
                "echo \"start $PWD\" >> \"{log}\"\nsleep 1\necho \"end $PWD\" >> \"{log}\"\n",
                log = tools.path().join("calls.log").display()
            ),
        )
        .unwrap();
        let npm = npm(format!("sh {}", script.display()));

        let (a, b) = tokio::join!(
            npm.restore_with_retry(first.path()),
            npm.restore_with_retry(second.path())
        );
        assert!(a.unwrap().succeeded());
        assert!(b.unwrap().succeeded());

        let calls = calls(tools.path());
        assert_eq!(calls.len(), 4);
        for pair in calls.chunks(2) {
            let dir = pair[0].strip_prefix("start ").unwrap();
            assert_eq!(pair[1], format!("end {}", dir), "installs interleaved: {:?}", calls);
        }
    }

    #[tokio::test]
    async fn test_run_script_passes_script_name() {
        let tools = TempDir::new().unwrap();
        let app = TempDir::new().unwrap();
        let npm = npm(fake_npm(tools.path(), 0));

        let run = npm.run_script(app.path(), "lint").await.unwrap();

        assert!(run.succeeded());
        assert_eq!(calls(tools.path()), vec!["run lint"]);
    }
}
