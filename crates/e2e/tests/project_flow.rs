//! Project lifecycle against a scripted stand-in for the dotnet muxer
//!
//! The script under `tests/fixtures` records every `new` invocation and
//! produces just enough output for the installer, generator, build and
//! migration paths to be exercised without a real SDK.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use harness_e2e::baseline::{embedded_baselines, verify_file_set};
use harness_e2e::{E2eError, HarnessConfig, HarnessContext, NewOptions, ProjectFactory};
use tempfile::TempDir;

const PACKAGES: &[&str] = &[
    "Microsoft.DotNet.Web.ProjectTemplates.3.0.3.0.0-dev.nupkg",
    "Microsoft.DotNet.Web.ItemTemplates.3.0.0-dev.nupkg",
    "Microsoft.DotNet.Web.Client.ItemTemplates.3.0.0-dev.nupkg",
    "Microsoft.DotNet.Web.Spa.ProjectTemplates.3.0.3.0.0-dev.nupkg",
];

fn fake_dotnet() -> &'static Path {
    static FAKE: OnceLock<PathBuf> = OnceLock::new();
    FAKE.get_or_init(|| {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/fake-dotnet.sh");
        // chmod never opens the file for writing, so concurrent spawns are safe
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    })
}

struct Fixture {
    tmp: TempDir,
    ctx: Arc<HarnessContext>,
}

impl Fixture {
    fn new(packages: &[&str]) -> Self {
        let tmp = TempDir::new().unwrap();
        let package_dir = tmp.path().join("packages");
        std::fs::create_dir_all(&package_dir).unwrap();
        for package in packages {
            std::fs::write(package_dir.join(package), b"pkg").unwrap();
        }

        let mut config = HarnessConfig::default();
        config.dotnet.path = fake_dotnet().to_path_buf();
        config.dotnet.ef_path = Some(PathBuf::from("/tools/ef/ef.dll"));
        config.templates.custom_hive = tmp.path().join("hive");
        config.templates.package_dir = package_dir;
        config.projects.base_dir = tmp.path().join("projects");
        config.cleanup.delete_attempts = 1;

        Self {
            ctx: HarnessContext::new(config),
            tmp,
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.tmp.path().join("projects")
    }

    fn registry(&self) -> String {
        std::fs::read_to_string(self.tmp.path().join("hive/installed")).unwrap_or_default()
    }

    fn new_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.base_dir().join("dotnet-calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn test_reinstalls_built_packages_once() {
    let fixture = Fixture::new(PACKAGES);

    fixture.ctx.ensure_templates_installed().await.unwrap();
    fixture.ctx.ensure_templates_installed().await.unwrap();

    let registry = fixture.registry();
    assert_eq!(registry.lines().count(), 4);
    for package in PACKAGES {
        assert!(registry.contains(package), "{} not installed", package);
    }

    let calls = fixture.new_calls();
    assert_eq!(calls.iter().filter(|c| c.contains("--uninstall")).count(), 13);
    assert_eq!(calls.iter().filter(|c| c.contains("--install")).count(), 4);
    assert!(calls
        .iter()
        .all(|c| c.contains(&format!("--debug:custom-hive {}", fixture.tmp.path().join("hive").display()))));
}

#[tokio::test]
async fn test_wrong_package_count_fails_setup() {
    let fixture = Fixture::new(&PACKAGES[..3]);

    let err = fixture.ctx.ensure_templates_installed().await.unwrap_err();

    assert!(matches!(err, E2eError::Setup(ref msg) if msg.contains("Expected 4 template packages")), "{}", err);
    assert!(fixture.registry().is_empty());
}

#[tokio::test]
async fn test_stale_hive_is_replaced() {
    let fixture = Fixture::new(PACKAGES);
    let hive = fixture.tmp.path().join("hive");
    std::fs::create_dir_all(&hive).unwrap();
    std::fs::write(hive.join("installed"), "/old/Microsoft.DotNet.Web.ProjectTemplates.2.2.nupkg\n").unwrap();

    fixture.ctx.ensure_templates_installed().await.unwrap();

    assert!(!fixture.registry().contains("/old/"));
}

#[tokio::test]
async fn test_webapi_baseline_file_set() {
    let fixture = Fixture::new(PACKAGES);
    let factory = ProjectFactory::new(fixture.ctx.clone());
    let baseline = embedded_baselines()
        .unwrap()
        .into_iter()
        .find(|b| b.template == "webapi")
        .unwrap();

    let project = factory.get_or_create(&baseline.key()).await.unwrap();
    let run = project.run_dotnet_new_raw(&baseline.arguments).await.unwrap();

    assert!(run.succeeded(), "{}", run.formatted_output());
    verify_file_set(&project, &baseline.files).unwrap();

    let generate = fixture.new_calls().pop().unwrap();
    assert!(generate.starts_with("new webapi -n webapi --debug:custom-hive"), "{}", generate);
    assert!(generate.ends_with(&format!("-o {}", project.output_dir().display())), "{}", generate);
}

#[tokio::test]
async fn test_extra_generated_file_breaks_baseline() {
    let fixture = Fixture::new(PACKAGES);
    let factory = ProjectFactory::new(fixture.ctx.clone());
    let baseline = embedded_baselines()
        .unwrap()
        .into_iter()
        .find(|b| b.template == "webapi")
        .unwrap();

    let project = factory.create().await.unwrap();
    project.run_dotnet_new_raw(&baseline.arguments).await.unwrap();
    std::fs::write(project.output_dir().join("Extra.cs"), "").unwrap();

    let err = verify_file_set(&project, &baseline.files).unwrap_err();
    assert!(err.to_string().contains("Extra.cs"), "{}", err);
}

#[tokio::test]
async fn test_individual_auth_flow() {
    let fixture = Fixture::new(PACKAGES);
    let factory = ProjectFactory::new(fixture.ctx.clone());
    let project = factory.get_or_create("mvcindividual").await.unwrap();

    let options = NewOptions::default().auth("Individual").use_local_db(true);
    assert!(project.run_dotnet_new("mvc", &options).await.unwrap().succeeded());
    assert!(project.run_dotnet_publish().await.unwrap().succeeded());
    assert!(project.run_dotnet_build().await.unwrap().succeeded());

    assert!(project.build_dir().is_dir());
    assert!(project.publish_dir().is_dir());
    project
        .assert_file_exists(&format!("{}.csproj", project.name()), true)
        .unwrap();

    let generate = fixture.new_calls().pop().unwrap();
    assert!(
        generate.starts_with("new mvc --auth Individual --use-local-db --debug:custom-hive"),
        "{}",
        generate
    );

    let run = project.run_ef_create_migration("mvc", true).await.unwrap();
    assert!(run.command_line().contains("--verbose --no-build migrations add mvc"));
    project.assert_empty_migration("mvc").unwrap();
}

#[tokio::test]
async fn test_concurrent_generation_shares_one_install() {
    let fixture = Fixture::new(PACKAGES);
    let factory = Arc::new(ProjectFactory::new(fixture.ctx.clone()));

    let tasks: Vec<_> = ["web", "webapi", "razor", "mvc"]
        .into_iter()
        .map(|template| {
            let factory = factory.clone();
            tokio::spawn(async move {
                let project = factory.get_or_create(template).await?;
                let run = project.run_dotnet_new(template, &NewOptions::default()).await?;
                Ok::<_, E2eError>((project, run.succeeded()))
            })
        })
        .collect();

    for task in tasks {
        let (project, succeeded) = task.await.unwrap().unwrap();
        assert!(succeeded);
        project.assert_file_exists("Program.cs", true).unwrap();
    }

    let calls = fixture.new_calls();
    assert_eq!(calls.iter().filter(|c| c.contains("--install")).count(), 4);
    assert_eq!(factory.len(), 4);

    factory.dispose().await;
    assert!(factory.is_empty());
    let remaining: Vec<_> = std::fs::read_dir(fixture.base_dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    assert!(remaining.is_empty());
}
