//! One-time template package reinstallation
//!
//! Before the first project is generated, every previously registered
//! version of the template packages is removed from the custom hive and the
//! packages produced by the current build are installed in their place, so
//! a run never tests whatever happened to be registered on the machine.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::info;

use crate::context::HarnessContext;
use crate::error::{E2eError, E2eResult};

/// Package ids of every template package that may have been registered
pub const TEMPLATE_PACKAGES: &[&str] = &[
    "Microsoft.DotNet.Common.ItemTemplates",
    "Microsoft.DotNet.Common.ProjectTemplates.2.1",
    "Microsoft.DotNet.Test.ProjectTemplates.2.1",
    "Microsoft.DotNet.Web.Client.ItemTemplates",
    "Microsoft.DotNet.Web.ItemTemplates",
    "Microsoft.DotNet.Web.ProjectTemplates.1.x",
    "Microsoft.DotNet.Web.ProjectTemplates.2.0",
    "Microsoft.DotNet.Web.ProjectTemplates.2.1",
    "Microsoft.DotNet.Web.ProjectTemplates.2.2",
    "Microsoft.DotNet.Web.ProjectTemplates.3.0",
    "Microsoft.DotNet.Web.Spa.ProjectTemplates",
    "Microsoft.DotNet.Web.Spa.ProjectTemplates.2.2",
    "Microsoft.DotNet.Web.Spa.ProjectTemplates.3.0",
];

/// Templates that must be unresolvable once the old packages are gone
pub const REMOVED_TEMPLATES: &[&str] = &["web", "webapp", "mvc", "react", "reactredux", "angular"];

/// Templates that must resolve after the fresh packages are installed
pub const INSTALLED_TEMPLATES: &[&str] = &["webapp", "web", "react"];

#[derive(Debug, Default)]
pub struct TemplateInstaller {
    installed: Mutex<bool>,
}

impl TemplateInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the reinstall sequence at most once. Callers arriving while it
    /// runs wait for it; a failed attempt leaves the flag unset.
    pub async fn ensure_installed(&self, ctx: &HarnessContext) -> E2eResult<()> {
        let mut installed = self.installed.lock().await;
        if *installed {
            return Ok(());
        }

        let templates = &ctx.config().templates;
        if !templates.reinstall {
            info!("Template reinstallation disabled; using templates already in {}", templates.custom_hive.display());
            *installed = true;
            return Ok(());
        }

        if templates.custom_hive.exists() {
            tokio::fs::remove_dir_all(&templates.custom_hive).await?;
        }

        install_template_packages(ctx).await?;
        *installed = true;
        Ok(())
    }
}

async fn install_template_packages(ctx: &HarnessContext) -> E2eResult<()> {
    // Expected to fail for packages that were never installed; the
    // verification below is what matters.
    for package in TEMPLATE_PACKAGES {
        ctx.run_dotnet_new(["--uninstall", package], true).await?;
    }

    for template in REMOVED_TEMPLATES {
        verify_cannot_find_template(ctx, template).await?;
    }

    let templates = &ctx.config().templates;
    let packages = find_built_packages(&templates.package_dir, templates.expected_package_count)?;

    for package in &packages {
        info!("Installing templates package {}...", package.display());
        let package = package.display().to_string();
        let run = ctx.run_dotnet_new(["--install".to_string(), package], false).await?;
        run.ensure_success()?;
    }

    for template in INSTALLED_TEMPLATES {
        verify_can_find_template(ctx, template).await?;
    }

    Ok(())
}

async fn verify_cannot_find_template(ctx: &HarnessContext, template: &str) -> E2eResult<()> {
    let run = ctx.run_dotnet_new([template], false).await?;
    let expected = format!("No templates matched the input template name: {}.", template);
    if !run.error().contains(&expected) {
        return Err(E2eError::Setup(format!(
            "Failed to uninstall previous templates. The template '{}' could still be found.",
            template
        )));
    }
    Ok(())
}

async fn verify_can_find_template(ctx: &HarnessContext, template: &str) -> E2eResult<()> {
    let run = ctx.run_dotnet_new(Vec::<String>::new(), false).await?;
    let output = run.output();
    if !output.contains(&format!(" {} ", template)) {
        return Err(E2eError::Setup(format!(
            "Couldn't find {} as an option in {}.",
            template, output
        )));
    }
    Ok(())
}

/// Template packages in `dir` whose file name starts with a known package id.
///
/// Any count other than `expected` means the package build is broken.
pub fn find_built_packages(dir: &Path, expected: usize) -> E2eResult<Vec<PathBuf>> {
    let mut built = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| {
        E2eError::Setup(format!("Cannot read template package directory {}: {}", dir.display(), e))
    })? {
        let path = entry?.path();
        let is_package = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("nupkg"))
            .unwrap_or(false);
        if path.is_file() && is_package {
            built.push(path);
        }
    }
    built.sort();

    let matching: Vec<PathBuf> = built
        .iter()
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            TEMPLATE_PACKAGES
                .iter()
                .any(|package| name.starts_with(&package.to_lowercase()))
        })
        .cloned()
        .collect();

    if matching.len() != expected {
        let listing = built
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(E2eError::Setup(format!(
            "Expected {} template packages in {} but found {}:\n{}",
            expected,
            dir.display(),
            matching.len(),
            listing
        )));
    }

    Ok(matching)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"pkg").unwrap();
    }

    #[test]
    fn test_finds_exactly_the_template_packages() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "Microsoft.DotNet.Web.ProjectTemplates.3.0.3.0.0-dev.nupkg");
        touch(tmp.path(), "Microsoft.DotNet.Web.ItemTemplates.3.0.0-dev.nupkg");
        touch(tmp.path(), "microsoft.dotnet.web.client.itemtemplates.3.0.0-dev.nupkg");
        touch(tmp.path(), "Microsoft.DotNet.Web.Spa.ProjectTemplates.3.0.3.0.0-dev.nupkg");
        touch(tmp.path(), "Microsoft.AspNetCore.Mvc.3.0.0-dev.nupkg");
        touch(tmp.path(), "Microsoft.DotNet.Web.ProjectTemplates.3.0.3.0.0-dev.symbols.txt");

        let packages = find_built_packages(tmp.path(), 4).unwrap();

        assert_eq!(packages.len(), 4);
        assert!(packages.iter().all(|p| p.extension().unwrap() == "nupkg"));
        assert!(!packages.iter().any(|p| p.to_string_lossy().contains("AspNetCore.Mvc")));
    }

    #[test]
    fn test_wrong_package_count_is_a_setup_error() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "Microsoft.DotNet.Web.ProjectTemplates.3.0.3.0.0-dev.nupkg");
        touch(tmp.path(), "Microsoft.AspNetCore.Mvc.3.0.0-dev.nupkg");

        let err = find_built_packages(tmp.path(), 4).unwrap_err();
        match err {
            E2eError::Setup(message) => {
                assert!(message.contains("found 1"));
                assert!(message.contains("Microsoft.AspNetCore.Mvc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_package_dir_is_a_setup_error() {
        let err = find_built_packages(Path::new("/nonexistent/packages"), 4).unwrap_err();
        assert!(matches!(err, E2eError::Setup(_)));
    }

    #[tokio::test]
    async fn test_disabled_reinstall_marks_installed_without_running_tools() {
        let mut config = HarnessConfig::default();
        config.templates.reinstall = false;
        config.dotnet.path = "definitely-not-dotnet".into();
        let ctx = HarnessContext::new(config);

        ctx.ensure_templates_installed().await.unwrap();
        ctx.ensure_templates_installed().await.unwrap();
    }
}
