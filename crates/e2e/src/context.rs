//! Shared harness context
//!
//! One [`HarnessContext`] is built per run and handed to every project
//! factory and scenario. It owns the process-wide singletons: the tool
//! invocation lock, the one-time template installer, the npm gate and the
//! lazily started automation driver.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use harness_common::{ProcessRun, ProcessSpec};
use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use crate::config::HarnessConfig;
use crate::driver::DriverServer;
use crate::error::{E2eError, E2eResult};
use crate::installer::TemplateInstaller;
use crate::npm::Npm;
use crate::webdriver::BrowserSession;

/// Serializes every generator, build, publish and migration invocation.
///
/// The generator is not safe to run concurrently on one machine, and builds
/// of SPA templates trigger package installs, so all of them queue here.
#[derive(Debug, Default)]
pub struct ToolLock {
    gate: Mutex<()>,
}

impl ToolLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` while holding the lock
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        let _guard = self.gate.lock().await;
        fut.await
    }
}

pub struct HarnessContext {
    config: HarnessConfig,
    tool_lock: ToolLock,
    npm: Npm,
    installer: TemplateInstaller,
    driver: OnceCell<Arc<DriverServer>>,
}

impl HarnessContext {
    pub fn new(config: HarnessConfig) -> Arc<Self> {
        Arc::new(Self {
            npm: Npm::new(&config.npm),
            config,
            tool_lock: ToolLock::new(),
            installer: TemplateInstaller::new(),
            driver: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn tool_lock(&self) -> &ToolLock {
        &self.tool_lock
    }

    pub fn npm(&self) -> &Npm {
        &self.npm
    }

    /// Reinstall the template packages once per run; later calls return
    /// immediately after the first completes.
    pub async fn ensure_templates_installed(&self) -> E2eResult<()> {
        self.installer.ensure_installed(self).await
    }

    /// A `dotnet` invocation rooted at `working_dir`
    pub fn dotnet(&self, working_dir: &Path) -> ProcessSpec {
        ProcessSpec::new(&self.config.dotnet.path, working_dir)
    }

    /// `dotnet new <args> --debug:custom-hive <hive>`, rooted at the project
    /// base directory
    pub fn dotnet_new<I, S>(&self, args: I) -> ProcessSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dotnet(&self.config.projects.base_dir)
            .arg("new")
            .args(args)
            .arg("--debug:custom-hive")
            .arg(self.config.templates.custom_hive.display().to_string())
    }

    /// Run [`dotnet_new`](Self::dotnet_new) under the tool lock and wait
    /// for it to exit.
    pub async fn run_dotnet_new<I, S>(&self, args: I, quiet: bool) -> E2eResult<ProcessRun>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = self.dotnet_new(args);
        if quiet {
            spec = spec.quiet();
        }

        self.run_locked(spec).await
    }

    /// Start `spec` under the tool lock and wait for it to exit
    pub async fn run_locked(&self, spec: ProcessSpec) -> E2eResult<ProcessRun> {
        tokio::fs::create_dir_all(spec.working_dir()).await?;

        self.tool_lock
            .run(async move {
                let run = spec.start()?;
                run.exited().await;
                Ok::<_, E2eError>(run)
            })
            .await
    }

    /// Whether browser automation can run on this host
    pub fn browser_supported(&self) -> bool {
        self.config.browser.enabled
    }

    /// The shared automation driver, started on first use.
    ///
    /// Concurrent first callers all wait on the same launch.
    pub async fn driver(&self) -> E2eResult<Arc<DriverServer>> {
        let driver = self
            .driver
            .get_or_try_init(|| async {
                let server = DriverServer::launch(&self.config.driver).await?;
                Ok::<_, E2eError>(Arc::new(server))
            })
            .await?;
        Ok(Arc::clone(driver))
    }

    /// Open a browser session against the shared driver
    pub async fn new_browser(&self) -> E2eResult<BrowserSession> {
        let driver = self.driver().await?;
        BrowserSession::start(driver.uri(), &self.config.browser).await
    }

    /// Tear down process-wide resources. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(driver) = self.driver.get() {
            info!("Shutting down automation driver");
            driver.shutdown();
        }
    }
}
