//! Generated projects and the per-collection factory that owns them

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use harness_common::{remove_dir_with_retry, ProcessRun};
use parking_lot::Mutex;
use tracing::info;

use crate::app::AppProcess;
use crate::context::HarnessContext;
use crate::error::{ensure, E2eError, E2eResult};

/// Body of a migration generated against an unchanged model
const EMPTY_MIGRATION: &str = "protected override void Up(MigrationBuilder migrationBuilder)
        {

        }

        protected override void Down(MigrationBuilder migrationBuilder)
        {

        }";

/// Options for `dotnet new`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewOptions {
    pub auth: Option<String>,
    pub language: Option<String>,
    pub use_local_db: bool,
    pub no_https: bool,
}

impl NewOptions {
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn use_local_db(mut self, use_local_db: bool) -> Self {
        self.use_local_db = use_local_db;
        self
    }

    pub fn no_https(mut self) -> Self {
        self.no_https = true;
        self
    }
}

/// `<template> [--auth a] [-lang l] [--use-local-db] [--no-https]`
pub fn new_args(template: &str, options: &NewOptions) -> Vec<String> {
    let mut args = vec![template.to_string()];
    if let Some(auth) = options.auth.as_deref().filter(|a| !a.is_empty()) {
        args.extend(["--auth".to_string(), auth.to_string()]);
    }
    if let Some(language) = options.language.as_deref().filter(|l| !l.is_empty()) {
        args.extend(["-lang".to_string(), language.to_string()]);
    }
    if options.use_local_db {
        args.push("--use-local-db".to_string());
    }
    if options.no_https {
        args.push("--no-https".to_string());
    }
    args
}

/// Normalise a raw generator argument string.
///
/// A leading `new` is dropped and any `-o`/`--output` option is removed,
/// since the project's own output directory is always appended. Without an
/// explicit `-n`/`--name` the template name is used, so project files are
/// named after the template rather than the output directory.
pub fn raw_args(arguments: &str) -> Vec<String> {
    let mut tokens = arguments.split_whitespace().peekable();
    if tokens.peek() == Some(&"new") {
        tokens.next();
    }

    let mut args = Vec::new();
    while let Some(token) = tokens.next() {
        if token == "-o" || token == "--output" {
            tokens.next();
            continue;
        }
        args.push(token.to_string());
    }

    let named = args.iter().any(|a| a == "-n" || a == "--name");
    let template = args.first().filter(|t| !t.starts_with('-')).cloned();
    if let (false, Some(template)) = (named, template) {
        args.extend(["-n".to_string(), template]);
    }
    args
}

/// One generated project: its identity and output locations
pub struct Project {
    name: String,
    guid: String,
    output_dir: PathBuf,
    build_dir: PathBuf,
    publish_dir: PathBuf,
    ctx: Arc<HarnessContext>,
}

impl Project {
    fn new(ctx: Arc<HarnessContext>) -> Self {
        let guid = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        let name = format!("{}{}", ctx.config().projects.name_prefix, guid);
        let output_dir = ctx.config().projects.base_dir.join(&name);
        let framework = &ctx.config().dotnet.framework;

        Self {
            build_dir: output_dir.join("bin").join("Debug").join(framework),
            publish_dir: output_dir.join("bin").join("Release").join(framework).join("publish"),
            name,
            guid,
            output_dir,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short random id, also injected into generated page titles
    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn publish_dir(&self) -> &Path {
        &self.publish_dir
    }

    pub fn context(&self) -> &Arc<HarnessContext> {
        &self.ctx
    }

    /// Generate the project from `template` into the output directory
    pub async fn run_dotnet_new(&self, template: &str, options: &NewOptions) -> E2eResult<ProcessRun> {
        let spec = self
            .ctx
            .dotnet_new(new_args(template, options))
            .arg("-o")
            .arg(self.output_dir.display().to_string());
        self.ctx.run_locked(spec).await
    }

    /// Generate with a raw argument string such as `new webapi -au Individual`
    pub async fn run_dotnet_new_raw(&self, arguments: &str) -> E2eResult<ProcessRun> {
        let spec = self
            .ctx
            .dotnet_new(raw_args(arguments))
            .arg("-o")
            .arg(self.output_dir.display().to_string());
        self.ctx.run_locked(spec).await
    }

    pub async fn run_dotnet_build(&self) -> E2eResult<ProcessRun> {
        info!("Building ASP.NET application...");
        let spec = self.ctx.dotnet(&self.output_dir).args(["build", "-c", "Debug"]);
        self.ctx.run_locked(spec).await
    }

    pub async fn run_dotnet_publish(&self) -> E2eResult<ProcessRun> {
        info!("Publishing ASP.NET application...");
        // Runtime store is not yet published
        let spec = self.ctx.dotnet(&self.output_dir).args([
            "publish",
            "-c",
            "Release",
            "-p:PublishWithAspNetCoreTargetManifest=false",
        ]);
        self.ctx.run_locked(spec).await
    }

    /// `dotnet <ef> --verbose [--no-build] migrations add <name>`, failing
    /// with the captured output on a nonzero exit.
    pub async fn run_ef_create_migration(&self, migration: &str, no_build: bool) -> E2eResult<ProcessRun> {
        let ef_path = self.ctx.config().dotnet.ef_path.as_ref().ok_or_else(|| {
            E2eError::Config("dotnet.ef_path must be set to create migrations".to_string())
        })?;

        let mut spec = self
            .ctx
            .dotnet(&self.output_dir)
            .arg(ef_path.display().to_string())
            .arg("--verbose");
        if no_build {
            spec = spec.arg("--no-build");
        }
        let spec = spec.args(["migrations", "add", migration]);

        let run = self.ctx.run_locked(spec).await?;
        run.ensure_success()?;
        Ok(run)
    }

    /// Check that the migration named `migration` has empty Up/Down bodies.
    ///
    /// Newlines are stripped from both sides since checkouts differ in line
    /// endings.
    pub fn assert_empty_migration(&self, migration: &str) -> E2eResult<()> {
        let migrations_dir = self.output_dir.join("Data").join("Migrations");
        let suffix = format!("{}.cs", migration);

        let file = std::fs::read_dir(&migrations_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .find(|path| path.to_string_lossy().ends_with(&suffix))
            .ok_or_else(|| {
                E2eError::AssertionFailed(format!(
                    "No migration ending in '{}' under {}",
                    suffix,
                    migrations_dir.display()
                ))
            })?;

        let contents = std::fs::read_to_string(&file)?;
        ensure(remove_newlines(&contents).contains(&remove_newlines(EMPTY_MIGRATION)), || {
            format!(
                "Migration {} is not empty. Regenerate the template migrations.\n{}",
                file.display(),
                contents
            )
        })
    }

    pub fn assert_file_exists(&self, path: &str, should_exist: bool) -> E2eResult<()> {
        let exists = self.output_dir.join(path).is_file();
        if should_exist {
            ensure(exists, || format!("Expected file to exist, but it doesn't: {}", path))
        } else {
            ensure(!exists, || format!("Expected file not to exist, but it does: {}", path))
        }
    }

    pub fn assert_directory_exists(&self, path: &str, should_exist: bool) -> E2eResult<()> {
        let exists = self.output_dir.join(path).is_dir();
        if should_exist {
            ensure(exists, || format!("Expected directory to exist, but it doesn't: {}", path))
        } else {
            ensure(!exists, || format!("Expected directory not to exist, but it does: {}", path))
        }
    }

    /// Contents of a generated file, which must exist
    pub fn read_file(&self, path: &str) -> E2eResult<String> {
        self.assert_file_exists(path, true)?;
        Ok(std::fs::read_to_string(self.output_dir.join(path))?)
    }

    /// Run the Debug build output in the Development environment
    pub async fn start_built_project(&self) -> E2eResult<AppProcess> {
        let dll = self.build_dir.join(format!("{}.dll", self.name));
        let spec = self
            .ctx
            .dotnet(&self.output_dir)
            .arg(dll.display().to_string())
            .env("ASPNETCORE_URLS", LOOPBACK_URLS)
            .env("ASPNETCORE_ENVIRONMENT", "Development");
        AppProcess::start(spec, &self.ctx.config().http).await
    }

    /// Run the Release publish output
    pub async fn start_published_project(&self) -> E2eResult<AppProcess> {
        let spec = self
            .ctx
            .dotnet(&self.publish_dir)
            .arg(format!("{}.dll", self.name))
            .env("ASPNETCORE_URLS", LOOPBACK_URLS);
        AppProcess::start(spec, &self.ctx.config().http).await
    }

    /// Best-effort removal of the output directory; never fails
    pub async fn delete_output_directory(&self) -> bool {
        remove_dir_with_retry(&self.output_dir, self.ctx.config().cleanup.delete_policy()).await
    }
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

/// Loopback with OS-assigned ports for both schemes
const LOOPBACK_URLS: &str = "http://127.0.0.1:0;https://127.0.0.1:0";

fn remove_newlines(text: &str) -> String {
    text.replace(['\r', '\n'], "")
}

/// Creates and caches projects for one collection of test cases.
///
/// The same key always yields the same project, so cases that build on
/// each other's output share a single generation.
pub struct ProjectFactory {
    ctx: Arc<HarnessContext>,
    projects: Mutex<HashMap<String, Arc<Project>>>,
}

impl ProjectFactory {
    pub fn new(ctx: Arc<HarnessContext>) -> Self {
        Self {
            ctx,
            projects: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<HarnessContext> {
        &self.ctx
    }

    /// The project for `key`, created on first request.
    ///
    /// Template installation always completes before a project is handed out.
    pub async fn get_or_create(&self, key: &str) -> E2eResult<Arc<Project>> {
        self.ctx.ensure_templates_installed().await?;

        let mut projects = self.projects.lock();
        let project = projects
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Project::new(self.ctx.clone())));
        Ok(project.clone())
    }

    /// A fresh project that no other key shares
    pub async fn create(&self) -> E2eResult<Arc<Project>> {
        self.ctx.ensure_templates_installed().await?;

        let project = Arc::new(Project::new(self.ctx.clone()));
        self.projects
            .lock()
            .insert(format!("#{}", project.guid()), project.clone());
        Ok(project)
    }

    pub fn len(&self) -> usize {
        self.projects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every project's output directory unless projects are kept
    pub async fn dispose(&self) {
        let projects: Vec<Arc<Project>> = self.projects.lock().drain().map(|(_, p)| p).collect();

        if self.ctx.config().cleanup.keep_projects {
            for project in &projects {
                info!("Keeping project {} at {}", project.name(), project.output_dir().display());
            }
            return;
        }

        for project in projects {
            project.delete_output_directory().await;
        }
    }
}
