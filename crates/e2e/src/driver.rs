//! Automation driver server - launching and health checking the shared
//! selenium-standalone process

use std::path::{Path, PathBuf};
use std::time::Duration;

use harness_common::{ProcessRun, ProcessSpec, RetryPolicy};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::error::{E2eError, E2eResult};

/// Handle to the running driver process
pub struct DriverServer {
    uri: String,
    port: u16,
    process: ProcessRun,
    tracking_file: Mutex<Option<PathBuf>>,
}

impl DriverServer {
    /// Launch the driver on a free port and wait until it reports healthy.
    ///
    /// If it never becomes healthy the process is killed before returning.
    pub async fn launch(config: &DriverConfig) -> E2eResult<Self> {
        let port = find_free_port()
            .map_err(|e| E2eError::DriverStartup(format!("Failed to find a free port: {}", e)))?;
        let uri = format!("http://localhost:{}/wd/hub", port);

        if !config.tracking_dir.is_dir() {
            return Err(E2eError::Setup(format!(
                "Invalid process tracking directory '{}'. Make sure it exists.",
                config.tracking_dir.display()
            )));
        }

        info!("Starting selenium standalone on port {}", port);

        let process = ProcessSpec::shell(
            &config.working_dir,
            &format!("{} run selenium-standalone start -- -- -port {}", config.command, port),
        )
        .start()
        .map_err(|e| E2eError::DriverStartup(e.to_string()))?;

        let server = DriverServer {
            uri,
            port,
            tracking_file: Mutex::new(None),
            process,
        };

        let tracking_file = write_tracking_file(&config.tracking_dir, server.process.pid()).await?;
        *server.tracking_file.lock() = Some(tracking_file);

        // Dropping `server` on failure kills the process and removes the tracking file
        server.wait_for_healthy(config).await?;

        info!("Selenium standalone is healthy at {}", server.uri);
        Ok(server)
    }

    async fn wait_for_healthy(&self, config: &DriverConfig) -> E2eResult<()> {
        let status_url = format!("{}/status", self.uri);
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout())
            .build()?;
        let client = &client;
        let status_url = status_url.as_str();
        let process = &self.process;

        let outcome = config
            .health_policy()
            .run(
                move |attempt| async move {
                    if process.has_exited() {
                        return Probe::Exited;
                    }
                    match client.get(status_url).send().await {
                        Ok(resp) if resp.status() == reqwest::StatusCode::OK => Probe::Healthy,
                        Ok(resp) => {
                            warn!("Health check returned {}", resp.status());
                            Probe::NotReady
                        }
                        Err(e) => {
                            if attempt == 1 {
                                info!("Waiting for selenium standalone to start...");
                            }
                            // Connection refused is expected while the driver is starting
                            if !e.is_connect() && !e.is_timeout() {
                                warn!("Health check error: {}", e);
                            }
                            Probe::NotReady
                        }
                    }
                },
                |probe| !matches!(probe, Probe::NotReady),
            )
            .await;

        match outcome {
            Ok(Probe::Healthy) => Ok(()),
            Ok(_) => Err(E2eError::DriverStartup(format!(
                "Selenium standalone exited before becoming healthy.\n{}",
                self.process.formatted_output()
            ))),
            Err(exhausted) => Err(E2eError::DriverHealthCheck(exhausted.attempts)),
        }
    }

    /// Remote end URI for WebDriver sessions
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kill the driver's process tree and delete its tracking file.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.process.kill();

        if let Some(path) = self.tracking_file.lock().take() {
            info!("Stopping selenium standalone (pid: {})", self.process.pid());
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove tracking file {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for DriverServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Probe {
    Healthy,
    NotReady,
    Exited,
}

/// Write `<pid>.<random>.pid` containing the pid so orphaned drivers can be
/// reaped by external tooling if this run dies ungracefully.
pub async fn write_tracking_file(tracking_dir: &Path, pid: u32) -> E2eResult<PathBuf> {
    let path = tracking_dir.join(format!("{}.{}.pid", pid, uuid::Uuid::new_v4()));
    let path_ref = path.as_path();

    let outcome = RetryPolicy::new(3, Duration::from_millis(500))
        .run(
            move |attempt| async move {
                let written = tokio::fs::write(path_ref, pid.to_string()).await;
                if let Err(e) = &written {
                    warn!("Failed to write tracking file {} on attempt {}: {}", path_ref.display(), attempt, e);
                }
                written
            },
            |written| written.is_ok(),
        )
        .await;

    match outcome {
        Ok(_) => Ok(path),
        Err(exhausted) => {
            exhausted.into_last()?;
            Ok(path)
        }
    }
}

/// Find a free port by binding an ephemeral loopback socket and releasing it
pub fn find_free_port() -> std::io::Result<u16> {
    use std::net::TcpListener;

    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        // Ports should be in valid range
        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[tokio::test]
    async fn test_tracking_file_holds_pid() {
        let tmp = TempDir::new().unwrap();

        let path = write_tracking_file(tmp.path(), 4242).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("4242."));
        assert!(name.ends_with(".pid"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
    }

    #[tokio::test]
    async fn test_missing_tracking_dir_is_a_setup_error() {
        let config = DriverConfig {
            tracking_dir: PathBuf::from("/nonexistent/tracking"),
            ..DriverConfig::default()
        };

        let err = DriverServer::launch(&config).await.err().unwrap();
        assert!(matches!(err, E2eError::Setup(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_driver_that_exits_early_fails_and_cleans_up() {
        let tracking = TempDir::new().unwrap();
        let config = DriverConfig {
            working_dir: tracking.path().to_path_buf(),
            command: "echo".to_string(),
            tracking_dir: tracking.path().to_path_buf(),
            startup_attempts: 5,
            poll_interval_ms: 50,
            request_timeout_ms: 200,
        };

        let err = DriverServer::launch(&config).await.err().unwrap();

        assert!(matches!(err, E2eError::DriverStartup(_) | E2eError::DriverHealthCheck(_)));
        assert_eq!(std::fs::read_dir(tracking.path()).unwrap().count(), 0);
    }
}
