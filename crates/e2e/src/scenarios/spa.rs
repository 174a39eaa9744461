use serde_json::{json, Value};
use tracing::info;

use crate::error::{ensure, E2eError, E2eResult};
use crate::project::{NewOptions, Project};
use crate::runner::{CaseContext, Collection, TestCase};
use crate::webdriver::{BrowserSession, Locator};

use super::{project_file_uses_sqlite, start, succeeded};

pub fn react() -> Collection {
    Collection::new(
        "react",
        vec![
            TestCase::new("react::no_auth", &["spa", "react"], |cx| {
                spa_template(cx, "reactnoauth", "react", false, false)
            }),
            TestCase::new("react::individual_auth", &["spa", "react", "auth"], |cx| {
                spa_template(cx, "reactindividual", "react", true, false)
            }),
            TestCase::new("react::individual_auth::local_db", &["spa", "react", "auth", "localdb"], |cx| {
                spa_template(cx, "reactindividualuld", "react", true, true)
            }),
        ],
    )
}

pub fn angular() -> Collection {
    Collection::new(
        "angular",
        vec![
            TestCase::new("angular::no_auth", &["spa", "angular"], |cx| {
                spa_template(cx, "angularnoauth", "angular", false, false)
            })
            .skip("No-auth Angular template is disabled upstream"),
            TestCase::new("angular::individual_auth", &["spa", "angular", "auth"], |cx| {
                spa_template(cx, "angularindividual", "angular", true, false)
            }),
            TestCase::new("angular::individual_auth::local_db", &["spa", "angular", "auth", "localdb"], |cx| {
                spa_template(cx, "angularindividualuld", "angular", true, true)
            }),
        ],
    )
}

async fn spa_template(
    cx: CaseContext,
    key: &'static str,
    template: &'static str,
    uses_auth: bool,
    use_local_db: bool,
) -> E2eResult<()> {
    let project = cx.factory.get_or_create(key).await?;

    let mut options = NewOptions::default().use_local_db(use_local_db);
    if uses_auth {
        options = options.auth("Individual");
    }
    succeeded(project.run_dotnet_new(template, &options).await?)?;

    let client_app = project.output_dir().join("ClientApp");
    project.assert_file_exists("ClientApp/package.json", true)?;

    let project_file = project.read_file(&format!("{}.csproj", project.name()))?;
    if uses_auth && !use_local_db {
        project_file_uses_sqlite(&project_file)?;
    }

    // Restoring up front keeps installs out of the (parallel) builds
    let npm = cx.harness.npm();
    succeeded(npm.restore_with_retry(&client_app).await?)?;
    succeeded(npm.run_script(&client_app, "lint").await?)?;
    if template == "react" || template == "reactredux" {
        succeeded(npm.run_script(&client_app, "test").await?)?;
    }

    succeeded(project.run_dotnet_publish().await?)?;
    succeeded(project.run_dotnet_build().await?)?;

    if uses_auth {
        project.run_ef_create_migration(template, true).await?;
        project.assert_empty_migration(template)?;
    }

    {
        let app = start(&project, false).await?;
        app.assert_status("/", reqwest::StatusCode::OK, Some("text/html")).await?;
        if cx.harness.browser_supported() {
            let mut browser = cx.harness.new_browser().await?;
            app.visit_in_browser(&browser).await?;
            basic_navigation(&browser, &project, !uses_auth).await?;
            browser.close().await?;
        }
    }

    if uses_auth {
        update_published_settings(&project)?;
    }

    let app = start(&project, true).await?;
    app.assert_status("/", reqwest::StatusCode::OK, Some("text/html")).await?;
    if cx.harness.browser_supported() {
        let mut browser = cx.harness.new_browser().await?;
        app.visit_in_browser(&browser).await?;
        basic_navigation(&browser, &project, !uses_auth).await?;
        browser.close().await?;
    }
    Ok(())
}

/// Use the development signing key in the published app
fn update_published_settings(project: &Project) -> E2eResult<()> {
    let app_settings = project.read_file("appsettings.json")?;
    let development = project.read_file("appsettings.Development.json")?;

    let merged = published_settings(&app_settings, &development)?;
    std::fs::write(project.publish_dir().join("appsettings.json"), merged)?;
    info!("Rewrote published appsettings.json for {}", project.name());
    Ok(())
}

/// Merge the development `IdentityServer` section into the production
/// settings and keep the generated key at `./tempkey.json`.
pub fn published_settings(app_settings: &str, development: &str) -> E2eResult<String> {
    let mut settings: Value = serde_json::from_str(app_settings)?;
    let development: Value = serde_json::from_str(development)?;

    let root = settings
        .as_object_mut()
        .ok_or_else(|| E2eError::AssertionFailed("appsettings.json is not a JSON object".to_string()))?;
    let identity = root.entry("IdentityServer").or_insert_with(|| json!({}));

    if let Some(dev_identity) = development.get("IdentityServer") {
        merge(identity, dev_identity);
    }
    merge(identity, &json!({ "Key": { "FilePath": "./tempkey.json" } }));

    Ok(serde_json::to_string_pretty(&settings)?)
}

/// Deep merge; objects merge key by key, anything else is replaced
fn merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, source) => *target = source.clone(),
    }
}

async fn basic_navigation(browser: &BrowserSession, project: &Project, visit_fetch_data: bool) -> E2eResult<()> {
    let heading = Locator::css("h1");

    browser.wait_for(&Locator::css("ul")).await?;

    // The project id is injected into <title> at generation time
    let title = browser.title().await?;
    ensure(title.contains(project.guid()), || {
        format!("Expected title '{}' to contain '{}'", title, project.guid())
    })?;

    expect_text(browser, &heading, "Hello, world!").await?;

    let counter_link = browser.find(&Locator::partial_link_text("Counter")).await?;
    browser.click(&counter_link).await?;
    browser.wait_for_url("counter").await?;
    expect_text(browser, &heading, "Counter").await?;

    let h1 = browser.find(&heading).await?;
    let counter = browser.parent(&h1).await?;
    let count = Locator::css("strong");
    browser.wait_for_text(&counter, &count, "0").await?;
    let button = browser.find_in(&counter, &Locator::css("button")).await?;
    browser.click(&button).await?;
    browser.wait_for_text(&counter, &count, "1").await?;

    if visit_fetch_data {
        let fetch_link = browser.find(&Locator::partial_link_text("Fetch data")).await?;
        browser.click(&fetch_link).await?;
        browser.wait_for_url("fetch-data").await?;
        expect_text(browser, &heading, "Weather forecast").await?;

        // Forecasts load asynchronously
        let h1 = browser.find(&heading).await?;
        let fetch_data = browser.parent(&h1).await?;
        browser.wait_for(&Locator::css("table>tbody>tr")).await?;
        let table = browser.wait_for_in(&fetch_data, &Locator::css("table")).await?;
        let rows = browser.find_all_in(&table, &Locator::css("tbody tr")).await?;
        ensure(rows.len() == 5, || format!("Expected 5 forecast rows but found {}", rows.len()))?;
    }
    Ok(())
}

async fn expect_text(browser: &BrowserSession, locator: &Locator, expected: &str) -> E2eResult<()> {
    let element = browser.wait_for(locator).await?;
    let text = browser.text(&element).await?;
    ensure(text == expected, || {
        format!("Expected {} to read '{}' but it read '{}'", locator, expected, text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_published_settings_merge_development_identity() {
        let app = r#"{
            "ConnectionStrings": { "DefaultConnection": "DataSource=app.db" },
            "IdentityServer": { "Clients": { "App": { "Profile": "IdentityServerSPA" } } }
        }"#;
        let dev = r#"{
            "Logging": { "LogLevel": { "Default": "Debug" } },
            "IdentityServer": { "Key": { "Type": "Development" } }
        }"#;

        let merged: Value = serde_json::from_str(&published_settings(app, dev).unwrap()).unwrap();

        assert_eq!(merged["IdentityServer"]["Key"]["Type"], "Development");
        assert_eq!(merged["IdentityServer"]["Key"]["FilePath"], "./tempkey.json");
        assert_eq!(merged["IdentityServer"]["Clients"]["App"]["Profile"], "IdentityServerSPA");
        assert_eq!(merged["ConnectionStrings"]["DefaultConnection"], "DataSource=app.db");
        assert!(merged.get("Logging").is_none());
    }

    #[test]
    fn test_published_settings_without_identity_section() {
        let merged: Value = serde_json::from_str(&published_settings("{}", "{}").unwrap()).unwrap();
        assert_eq!(merged["IdentityServer"]["Key"]["FilePath"], "./tempkey.json");
    }

    #[test]
    fn test_published_settings_rejects_non_object() {
        assert!(published_settings("[]", "{}").is_err());
        assert!(published_settings("{", "{}").is_err());
    }
}
