//! Template scenarios
//!
//! Each collection mirrors one template test class: its cases run in order
//! against a shared project factory, while collections run in parallel.

mod baseline;
mod mvc;
mod razor_pages;
mod spa;
mod web;

use harness_common::ProcessRun;

use crate::app::AppProcess;
use crate::error::{ensure, E2eResult};
use crate::project::Project;
use crate::runner::Collection;

pub use spa::published_settings;

/// Packages that only templates with a database should reference
const DATABASE_PACKAGES: &[&str] = &[
    ".db",
    "Microsoft.EntityFrameworkCore.Tools",
    "Microsoft.VisualStudio.Web.CodeGeneration.Design",
    "Microsoft.EntityFrameworkCore.Tools.DotNet",
    "Microsoft.Extensions.SecretManager.Tools",
];

/// Every scenario collection
pub fn catalogue() -> E2eResult<Vec<Collection>> {
    Ok(vec![
        web::empty_web(),
        web::web_api(),
        mvc::collection(),
        razor_pages::collection(),
        spa::react(),
        spa::angular(),
        baseline::collection()?,
    ])
}

fn succeeded(run: ProcessRun) -> E2eResult<ProcessRun> {
    run.ensure_success()?;
    Ok(run)
}

/// Publish, then build.
///
/// Publish output lands in `bin/Release/<fw>/publish` and is untouched by a
/// later Debug build; the reverse order is not safe.
async fn publish_and_build(project: &Project) -> E2eResult<()> {
    succeeded(project.run_dotnet_publish().await?)?;
    succeeded(project.run_dotnet_build().await?)?;
    Ok(())
}

async fn start(project: &Project, published: bool) -> E2eResult<AppProcess> {
    if published {
        project.start_published_project().await
    } else {
        project.start_built_project().await
    }
}

fn project_file_excludes_database(contents: &str) -> E2eResult<()> {
    for package in DATABASE_PACKAGES {
        ensure(!contents.contains(package), || {
            format!("Project file unexpectedly references '{}'", package)
        })?;
    }
    Ok(())
}

/// Without LocalDB an Individual-auth template uses a SQLite file
fn project_file_uses_sqlite(contents: &str) -> E2eResult<()> {
    ensure(contents.contains(".db"), || {
        "Project file does not reference a SQLite database".to_string()
    })
}
