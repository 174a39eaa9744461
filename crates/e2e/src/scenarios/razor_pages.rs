use crate::error::E2eResult;
use crate::project::NewOptions;
use crate::runner::{CaseContext, Collection, TestCase};

use super::{project_file_excludes_database, project_file_uses_sqlite, publish_and_build, start, succeeded};

pub fn collection() -> Collection {
    Collection::new(
        "razor_pages",
        vec![
            TestCase::new("razor_pages::no_auth", &["razor"], no_auth),
            TestCase::new("razor_pages::individual_auth", &["razor", "auth"], |cx| individual_auth(cx, false)),
            TestCase::new("razor_pages::individual_auth::local_db", &["razor", "auth", "localdb"], |cx| {
                individual_auth(cx, true)
            }),
        ],
    )
}

async fn no_auth(cx: CaseContext) -> E2eResult<()> {
    let project = cx.factory.get_or_create("razorpagesnoauth").await?;

    succeeded(project.run_dotnet_new("razor", &NewOptions::default()).await?)?;

    project.assert_file_exists("Pages/Shared/_LoginPartial.cshtml", false)?;

    let project_file = project.read_file(&format!("{}.csproj", project.name()))?;
    project_file_excludes_database(&project_file)?;

    publish_and_build(&project).await?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/").await?;
        app.assert_ok("/Privacy").await?;
    }
    Ok(())
}

async fn individual_auth(cx: CaseContext, use_local_db: bool) -> E2eResult<()> {
    let key = format!("razorpagesindividual{}", if use_local_db { "uld" } else { "" });
    let project = cx.factory.get_or_create(&key).await?;

    let options = NewOptions::default().auth("Individual").use_local_db(use_local_db);
    succeeded(project.run_dotnet_new("razor", &options).await?)?;

    project.assert_file_exists("Pages/Shared/_LoginPartial.cshtml", true)?;

    let project_file = project.read_file(&format!("{}.csproj", project.name()))?;
    if !use_local_db {
        project_file_uses_sqlite(&project_file)?;
    }

    publish_and_build(&project).await?;

    project.run_ef_create_migration("razorpages", true).await?;
    project.assert_empty_migration("razorpages")?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/").await?;
        app.assert_ok("/Identity/Account/Login").await?;
        app.assert_ok("/Privacy").await?;
    }
    Ok(())
}
