//! Template suite entry point
//!
//! This file is the test binary that generates, builds and runs every
//! template scenario against the real toolchain. It only runs when
//! `TEMPLATE_HARNESS=1` is set, so plain `cargo test` stays hermetic.
//! Run with: TEMPLATE_HARNESS=1 cargo test --package harness-e2e --test templates -- --config harness.toml

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use harness_e2e::scenarios::catalogue;
use harness_e2e::{CaseFilter, HarnessConfig, HarnessContext, TestRunner};

const ENABLE_VAR: &str = "TEMPLATE_HARNESS";

#[derive(Parser, Debug)]
#[command(name = "template-harness")]
#[command(about = "End-to-end tests for web project templates")]
struct Args {
    /// Harness configuration file
    #[arg(short, long, env = "TEMPLATE_HARNESS_CONFIG", default_value = "harness.toml")]
    config: PathBuf,

    /// Run only cases whose name contains this text (repeatable)
    #[arg(short, long)]
    name: Vec<String>,

    /// Run only cases with this tag (repeatable)
    #[arg(short, long)]
    tag: Vec<String>,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// List the selected cases without running them
    #[arg(long)]
    list: bool,

    /// Use the templates already in the custom hive
    #[arg(long)]
    no_reinstall: bool,

    /// Run browser checks for SPA templates
    #[arg(long)]
    browser: bool,

    /// Leave generated projects on disk
    #[arg(long)]
    keep_projects: bool,

    /// Debug logging, including quiet tool output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if std::env::var_os(ENABLE_VAR).is_none() {
        println!("template suite skipped; set {}=1 to run it", ENABLE_VAR);
        return;
    }

    let args = Args::parse();
    init_tracing(args.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn async_main(args: Args) -> anyhow::Result<bool> {
    let mut config = HarnessConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    if args.no_reinstall {
        config.templates.reinstall = false;
    }
    if args.browser {
        config.browser.enabled = true;
    }
    if args.keep_projects {
        config.cleanup.keep_projects = true;
    }

    let filter = CaseFilter {
        names: args.name,
        tags: args.tag,
    };
    let collections = filter.apply(catalogue().context("loading template scenarios")?);

    if args.list {
        for collection in &collections {
            for case in &collection.cases {
                println!("{} [{}] {}", collection.name, case.tags.join(","), case.name);
            }
        }
        return Ok(true);
    }

    info!("Template harness v{}", harness_common::VERSION);
    let ctx = HarnessContext::new(config);
    let runner = TestRunner::new(ctx.clone(), args.output);

    let suite = tokio::select! {
        suite = runner.run(collections) => suite,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; shutting down");
            ctx.shutdown();
            return Ok(false);
        }
    };

    ctx.shutdown();
    runner.write_results(&suite).context("writing test results")?;

    info!("{} of {} case(s) passed", suite.passed, suite.total);
    Ok(suite.all_passed())
}
