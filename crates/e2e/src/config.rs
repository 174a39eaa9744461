//! Harness configuration
//!
//! Everything that locates external tools or tunes retry ceilings lives
//! here. Loaded from TOML; a missing file or section falls back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use harness_common::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::error::E2eResult;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Generator, build and migration tooling
    pub dotnet: DotNetConfig,

    /// Template package (re)installation
    pub templates: TemplatesConfig,

    /// Generated project locations
    pub projects: ProjectsConfig,

    /// Package manager used by SPA templates
    pub npm: NpmConfig,

    /// Browser automation driver server
    pub driver: DriverConfig,

    /// Browser sessions
    pub browser: BrowserConfig,

    /// Probes against launched applications
    pub http: HttpConfig,

    /// Output directory teardown
    pub cleanup: CleanupConfig,
}

impl HarnessConfig {
    /// Load configuration from file, or defaults when it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DotNetConfig {
    /// Path to the dotnet muxer
    pub path: PathBuf,

    /// Path to the EF Core command-line tool assembly
    pub ef_path: Option<PathBuf>,

    /// Target framework moniker of generated projects
    pub framework: String,
}

impl Default for DotNetConfig {
    fn default() -> Self {
        Self {
            path: std::env::var_os("DOTNET_HOST_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dotnet")),
            ef_path: None,
            framework: "netcoreapp3.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    /// Isolated template registry passed as `--debug:custom-hive`
    pub custom_hive: PathBuf,

    /// Directory containing the freshly built template packages
    pub package_dir: PathBuf,

    /// Number of template packages the build is expected to produce
    pub expected_package_count: usize,

    /// Uninstall and reinstall templates before the first generation
    pub reinstall: bool,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            custom_hive: scratch_dir().join("hive"),
            package_dir: PathBuf::from("artifacts/packages"),
            expected_package_count: 4,
            reinstall: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Parent directory of every generated project
    pub base_dir: PathBuf,

    /// Prefix of generated project names
    pub name_prefix: String,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            base_dir: scratch_dir().join("projects"),
            name_prefix: "AspNet.Template.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NpmConfig {
    /// Package manager executable (or shell snippet)
    pub command: String,

    /// Attempts for `install` before giving up
    pub restore_attempts: u32,
}

impl Default for NpmConfig {
    fn default() -> Self {
        Self {
            command: "npm".to_string(),
            restore_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Directory whose package.json provides the `selenium-standalone` script
    pub working_dir: PathBuf,

    /// Package manager used to launch the driver
    pub command: String,

    /// Where pid files are written so orphaned drivers can be reaped
    pub tracking_dir: PathBuf,

    /// Health probes before startup is declared failed
    pub startup_attempts: u32,

    /// Interval between health probes
    pub poll_interval_ms: u64,

    /// Timeout of a single health probe
    pub request_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            command: "npm".to_string(),
            tracking_dir: scratch_dir().join("tracking"),
            startup_attempts: 30,
            poll_interval_ms: 1000,
            request_timeout_ms: 1000,
        }
    }
}

impl DriverConfig {
    pub fn health_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.startup_attempts, Duration::from_millis(self.poll_interval_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Whether this host can run browser automation at all
    pub enabled: bool,

    /// WebDriver `browserName` capability
    pub name: String,

    /// Run the browser without a window
    pub headless: bool,

    /// How long element and URL waits poll before failing
    pub element_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "chrome".to_string(),
            headless: true,
            element_timeout_ms: 10_000,
        }
    }
}

impl BrowserConfig {
    pub fn wait_policy(&self) -> RetryPolicy {
        RetryPolicy::within(Duration::from_millis(self.element_timeout_ms), Duration::from_millis(250))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Attempts per probe while the application may still be starting
    pub attempts: u32,

    /// Delay between probe attempts
    pub delay_ms: u64,

    /// Timeout of a single request
    pub timeout_ms: u64,

    /// How long to wait for the "Now listening on" log line
    pub listen_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay_ms: 1000,
            timeout_ms: 30_000,
            listen_timeout_ms: 60_000,
        }
    }
}

impl HttpConfig {
    pub fn probe_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, Duration::from_millis(self.delay_ms))
    }

    pub fn listen_policy(&self) -> RetryPolicy {
        RetryPolicy::within(Duration::from_millis(self.listen_timeout_ms), Duration::from_millis(100))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Attempts to delete a project directory
    pub delete_attempts: u32,

    /// Delay between delete attempts
    pub delete_delay_ms: u64,

    /// Leave generated projects on disk for inspection
    pub keep_projects: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            delete_attempts: 10,
            delete_delay_ms: 3000,
            keep_projects: false,
        }
    }
}

impl CleanupConfig {
    pub fn delete_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.delete_attempts, Duration::from_millis(self.delete_delay_ms))
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join("template-harness")
}
