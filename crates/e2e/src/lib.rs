//! Template E2E Test Framework
//!
//! This crate drives the project generator end to end:
//! - Reinstalls the freshly built template packages into an isolated hive
//! - Generates, builds and publishes projects, one generator/build at a time
//! - Starts the generated application and probes it over HTTP
//! - Drives a real browser through a shared selenium-standalone server
//! - Checks generated file sets against embedded baselines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Template Test Runner (Rust)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                  │
//! │    └── Collection (parallel) ── TestCase (sequential)        │
//! │          └── ProjectFactory::get_or_create(key) -> Project   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HarnessContext (one per run)                                │
//! │    ├── ToolLock          dotnet new / build / publish / ef   │
//! │    ├── TemplateInstaller uninstall, verify, install, verify  │
//! │    ├── Npm               serialized install with retries     │
//! │    └── DriverServer      started once, on first browser use  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Project                                                     │
//! │    ├── run_dotnet_new / build / publish / ef migrations      │
//! │    └── start_built_project / start_published_project         │
//! │          └── AppProcess: assert_ok, assert_status, browser   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod baseline;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod installer;
pub mod npm;
pub mod project;
pub mod runner;
pub mod scenarios;
pub mod webdriver;

pub use config::HarnessConfig;
pub use context::HarnessContext;
pub use error::{E2eError, E2eResult};
pub use project::{NewOptions, Project, ProjectFactory};
pub use runner::{CaseFilter, Collection, TestCase, TestRunner, TestSuiteResult};
