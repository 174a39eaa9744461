//! Suite runner: executes scenario collections against one shared harness
//! context and reports per-case results

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::context::HarnessContext;
use crate::error::{E2eError, E2eResult};
use crate::project::ProjectFactory;

/// What a running case gets: the shared harness plus its collection's factory
#[derive(Clone)]
pub struct CaseContext {
    pub harness: Arc<HarnessContext>,
    pub factory: Arc<ProjectFactory>,
}

type CaseFn = Arc<dyn Fn(CaseContext) -> BoxFuture<'static, E2eResult<()>> + Send + Sync>;

/// A single named test case
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub tags: Vec<String>,
    pub skip: Option<String>,
    run: CaseFn,
}

impl TestCase {
    pub fn new<F, Fut>(name: impl Into<String>, tags: &[&str], run: F) -> Self
    where
        F: Fn(CaseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = E2eResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            skip: None,
            run: Arc::new(move |cx| run(cx).boxed()),
        }
    }

    /// Report the case as skipped instead of running it
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("skip", &self.skip)
            .finish()
    }
}

/// Cases that run one after another and share a project factory.
/// Collections run concurrently with each other.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub cases: Vec<TestCase>,
}

impl Collection {
    pub fn new(name: impl Into<String>, cases: Vec<TestCase>) -> Self {
        Self {
            name: name.into(),
            cases,
        }
    }
}

/// Selects cases by name substring or tag; an empty filter selects all
#[derive(Debug, Clone, Default)]
pub struct CaseFilter {
    pub names: Vec<String>,
    pub tags: Vec<String>,
}

impl CaseFilter {
    pub fn matches(&self, case: &TestCase) -> bool {
        let name_ok = self.names.is_empty() || self.names.iter().any(|n| case.name.contains(n.as_str()));
        let tag_ok = self.tags.is_empty() || self.tags.iter().any(|t| case.tags.contains(t));
        name_ok && tag_ok
    }

    /// Drop unselected cases and then empty collections
    pub fn apply(&self, collections: Vec<Collection>) -> Vec<Collection> {
        collections
            .into_iter()
            .map(|mut collection| {
                collection.cases.retain(|case| self.matches(case));
                collection
            })
            .filter(|collection| !collection.cases.is_empty())
            .collect()
    }
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub collection: String,
    pub success: bool,
    pub skipped: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    fn from_results(started_at: DateTime<Utc>, mut results: Vec<TestResult>, duration_ms: u64) -> Self {
        results.sort_by(|a, b| (&a.collection, &a.name).cmp(&(&b.collection, &b.name)));
        let skipped = results.iter().filter(|r| r.skipped).count();
        let passed = results.iter().filter(|r| r.success && !r.skipped).count();
        Self {
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed - skipped,
            skipped,
            duration_ms,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Main template test runner
pub struct TestRunner {
    ctx: Arc<HarnessContext>,
    output_dir: PathBuf,
}

impl TestRunner {
    pub fn new(ctx: Arc<HarnessContext>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            output_dir: output_dir.into(),
        }
    }

    /// Run every collection concurrently; a setup failure aborts cases that
    /// have not started yet.
    pub async fn run(&self, collections: Vec<Collection>) -> TestSuiteResult {
        let start = Instant::now();
        let started_at = Utc::now();
        let aborted = Arc::new(AtomicBool::new(false));
        let case_count: usize = collections.iter().map(|c| c.cases.len()).sum();

        info!("Running {} test(s) in {} collection(s)...", case_count, collections.len());

        let mut tasks = JoinSet::new();
        for collection in collections {
            let ctx = self.ctx.clone();
            let aborted = aborted.clone();
            let span = info_span!("collection", name = %collection.name);
            tasks.spawn(run_collection(ctx, collection, aborted).instrument(span));
        }

        let mut results = Vec::with_capacity(case_count);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(collection_results) => results.extend(collection_results),
                Err(e) => error!("Collection task failed: {}", e),
            }
        }

        let suite = TestSuiteResult::from_results(started_at, results, start.elapsed().as_millis() as u64);

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            suite.passed, suite.failed, suite.skipped, suite.duration_ms
        );
        suite
    }

    /// Write test results to JSON file
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.output_dir, results)
    }
}

pub fn write_results(output_dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

async fn run_collection(ctx: Arc<HarnessContext>, collection: Collection, aborted: Arc<AtomicBool>) -> Vec<TestResult> {
    let factory = Arc::new(ProjectFactory::new(ctx.clone()));
    let mut results = Vec::with_capacity(collection.cases.len());

    for case in &collection.cases {
        let result = if let Some(reason) = &case.skip {
            info!("- {} skipped: {}", case.name, reason);
            TestResult {
                name: case.name.clone(),
                collection: collection.name.clone(),
                success: true,
                skipped: true,
                duration_ms: 0,
                error: Some(reason.clone()),
            }
        } else if aborted.load(Ordering::SeqCst) {
            TestResult {
                name: case.name.clone(),
                collection: collection.name.clone(),
                success: false,
                skipped: false,
                duration_ms: 0,
                error: Some("Not run: template setup failed".to_string()),
            }
        } else {
            let cx = CaseContext {
                harness: ctx.clone(),
                factory: factory.clone(),
            };
            run_case(&collection.name, case, cx, &aborted).await
        };
        results.push(result);
    }

    factory.dispose().await;
    results
}

async fn run_case(collection: &str, case: &TestCase, cx: CaseContext, aborted: &AtomicBool) -> TestResult {
    let start = Instant::now();
    let span = info_span!("case", name = %case.name);

    let outcome = AssertUnwindSafe((case.run)(cx))
        .catch_unwind()
        .instrument(span)
        .await;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            if matches!(e, E2eError::Setup(_)) {
                warn!("Template setup failed; aborting remaining cases");
                aborted.store(true, Ordering::SeqCst);
            }
            Some(e.to_string())
        }
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    match &error {
        None => info!("✓ {} ({} ms)", case.name, duration_ms),
        Some(e) => error!("✗ {} - {}", case.name, e),
    }

    TestResult {
        name: case.name.clone(),
        collection: collection.to_string(),
        success: error.is_none(),
        skipped: false,
        duration_ms,
        error,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
