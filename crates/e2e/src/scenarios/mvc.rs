use crate::error::E2eResult;
use crate::project::NewOptions;
use crate::runner::{CaseContext, Collection, TestCase};

use super::{project_file_excludes_database, project_file_uses_sqlite, publish_and_build, start, succeeded};

pub fn collection() -> Collection {
    Collection::new(
        "mvc",
        vec![
            TestCase::new("mvc::no_auth::csharp", &["mvc"], |cx| no_auth(cx, None)),
            TestCase::new("mvc::no_auth::fsharp", &["mvc", "fsharp"], |cx| no_auth(cx, Some("F#"))),
            TestCase::new("mvc::individual_auth::local_db", &["mvc", "auth", "localdb"], |cx| {
                individual_auth(cx, true)
            }),
            TestCase::new("mvc::individual_auth", &["mvc", "auth"], |cx| individual_auth(cx, false)),
        ],
    )
}

async fn no_auth(cx: CaseContext, language: Option<&'static str>) -> E2eResult<()> {
    let fsharp = language == Some("F#");
    let key = format!("mvcnoauth{}", if fsharp { "fsharp" } else { "csharp" });
    let project = cx.factory.get_or_create(&key).await?;

    let mut options = NewOptions::default();
    if let Some(language) = language {
        options = options.language(language);
    }
    succeeded(project.run_dotnet_new("mvc", &options).await?)?;

    project.assert_directory_exists("Areas", false)?;
    project.assert_directory_exists("Extensions", false)?;
    project.assert_file_exists("urlRewrite.config", false)?;
    project.assert_file_exists("Controllers/AccountController.cs", false)?;

    let extension = if fsharp { "fsproj" } else { "csproj" };
    let project_file = project.read_file(&format!("{}.{}", project.name(), extension))?;
    project_file_excludes_database(&project_file)?;

    publish_and_build(&project).await?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/").await?;
        app.assert_ok("/Home/Privacy").await?;
    }
    Ok(())
}

async fn individual_auth(cx: CaseContext, use_local_db: bool) -> E2eResult<()> {
    let key = format!("mvcindividual{}", if use_local_db { "uld" } else { "" });
    let project = cx.factory.get_or_create(&key).await?;

    let options = NewOptions::default().auth("Individual").use_local_db(use_local_db);
    succeeded(project.run_dotnet_new("mvc", &options).await?)?;

    project.assert_directory_exists("Extensions", false)?;
    project.assert_file_exists("urlRewrite.config", false)?;
    project.assert_file_exists("Controllers/AccountController.cs", false)?;

    let project_file = project.read_file(&format!("{}.csproj", project.name()))?;
    if !use_local_db {
        project_file_uses_sqlite(&project_file)?;
    }

    publish_and_build(&project).await?;

    project.run_ef_create_migration("mvc", true).await?;
    project.assert_empty_migration("mvc")?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/").await?;
        app.assert_ok("/Identity/Account/Login").await?;
        app.assert_ok("/Home/Privacy").await?;
    }
    Ok(())
}
