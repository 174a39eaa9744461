use crate::baseline::{embedded_baselines, verify_file_set, TemplateBaseline};
use crate::error::E2eResult;
use crate::runner::{CaseContext, Collection, TestCase};

use super::succeeded;

/// One case per template/auth combination in the embedded manifest
pub fn collection() -> E2eResult<Collection> {
    let cases = embedded_baselines()?
        .into_iter()
        .map(|baseline| {
            let name = baseline.case_name();
            TestCase::new(name, &["baseline"], move |cx| produces_expected_files(cx, baseline.clone()))
        })
        .collect();

    Ok(Collection::new("baseline", cases))
}

async fn produces_expected_files(cx: CaseContext, baseline: TemplateBaseline) -> E2eResult<()> {
    let project = cx.factory.get_or_create(&baseline.key()).await?;

    succeeded(project.run_dotnet_new_raw(&baseline.arguments).await?)?;

    for file in &baseline.files {
        project.assert_file_exists(file, true)?;
    }
    verify_file_set(&project, &baseline.files)
}
