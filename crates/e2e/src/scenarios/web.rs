use crate::error::E2eResult;
use crate::project::NewOptions;
use crate::runner::{CaseContext, Collection, TestCase};

use super::{publish_and_build, start, succeeded};

pub fn empty_web() -> Collection {
    Collection::new(
        "empty_web",
        vec![TestCase::new("empty_web::template", &["web"], empty_web_template)],
    )
}

pub fn web_api() -> Collection {
    Collection::new(
        "web_api",
        vec![TestCase::new("web_api::template", &["webapi"], web_api_template)],
    )
}

async fn empty_web_template(cx: CaseContext) -> E2eResult<()> {
    let project = cx.factory.create().await?;

    succeeded(project.run_dotnet_new("web", &NewOptions::default()).await?)?;
    publish_and_build(&project).await?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/").await?;
    }
    Ok(())
}

async fn web_api_template(cx: CaseContext) -> E2eResult<()> {
    let project = cx.factory.get_or_create("webapi").await?;

    succeeded(project.run_dotnet_new("webapi", &NewOptions::default()).await?)?;
    publish_and_build(&project).await?;

    for published in [false, true] {
        let app = start(&project, published).await?;
        app.assert_ok("/api/values").await?;
        app.assert_not_found("/").await?;
    }
    Ok(())
}
