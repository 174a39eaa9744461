//! Template baselines - the exact file set each template invocation must
//! produce

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::{E2eError, E2eResult};
use crate::project::Project;

const EMBEDDED_BASELINES: &str = include_str!("../resources/template-baselines.json");

/// Project metadata extensions never listed in a baseline
const IGNORED_EXTENSIONS: &[&str] = &[".csproj", ".fsproj", ".props", ".targets"];

/// Build output directories never listed in a baseline
const IGNORED_PREFIXES: &[&str] = &["bin/", "obj/"];

#[derive(Debug, Deserialize)]
struct BaselineEntry {
    #[serde(rename = "Arguments")]
    arguments: String,
    #[serde(rename = "Files")]
    files: Vec<String>,
}

/// template name -> auth option -> entry
type BaselineManifest = BTreeMap<String, BTreeMap<String, BaselineEntry>>;

/// One template/auth combination and the files it must produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBaseline {
    pub template: String,
    pub auth: String,
    pub arguments: String,
    pub files: Vec<String>,
}

impl TemplateBaseline {
    /// Factory key shared by every case with the same arguments
    pub fn key(&self) -> String {
        baseline_key(&self.arguments)
    }

    /// Display name for test reports
    pub fn case_name(&self) -> String {
        if self.auth.is_empty() {
            format!("baseline::{}", self.template)
        } else {
            format!("baseline::{}::{}", self.template, self.auth)
        }
    }
}

/// Baselines compiled into the harness
pub fn embedded_baselines() -> E2eResult<Vec<TemplateBaseline>> {
    parse_baselines(EMBEDDED_BASELINES)
}

pub fn parse_baselines(json: &str) -> E2eResult<Vec<TemplateBaseline>> {
    let manifest: BaselineManifest = serde_json::from_str(json)?;

    Ok(manifest
        .into_iter()
        .flat_map(|(template, options)| {
            options.into_iter().map(move |(auth, entry)| TemplateBaseline {
                template: template.clone(),
                auth,
                arguments: entry.arguments,
                files: entry.files,
            })
        })
        .collect())
}

/// Derive a project key from generator arguments: template name, auth
/// mode, `uld` for local DB and the language with `#` spelled out.
pub fn baseline_key(arguments: &str) -> String {
    let mut key = capture(r"new (?P<v>[a-zA-Z]+)", arguments).unwrap_or_default();

    if let Some(auth) = capture(r"(?:-au|--auth) (?P<v>[a-zA-Z]+)", arguments) {
        key.push_str(&auth);
    }

    if arguments
        .split_whitespace()
        .any(|token| token == "--uld" || token == "--use-local-db")
    {
        key.push_str("uld");
    }

    if let Some(language) = capture(r"(?:--language|-lang) (?P<v>\S+)", arguments) {
        key.push_str(&language.replace('#', "Sharp"));
    }

    key
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text).map(|caps| caps["v"].to_string())
}

/// Build artifacts and project metadata, which baselines do not track
pub fn is_ignored(relative_path: &str) -> bool {
    IGNORED_EXTENSIONS.iter().any(|ext| relative_path.ends_with(ext))
        || IGNORED_PREFIXES.iter().any(|prefix| relative_path.starts_with(prefix))
}

/// Differences between a generated tree and its baseline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSetReport {
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl FileSetReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }

    pub fn into_result(self) -> E2eResult<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(E2eError::BaselineMismatch {
                missing: self.missing,
                unexpected: self.unexpected,
            })
        }
    }
}

/// Compare every file under `root` against `expected` (relative, `/`
/// separated). Ignored paths may be present either way.
pub fn compare_file_set(root: &Path, expected: &[String]) -> E2eResult<FileSetReport> {
    let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();

    let missing = expected
        .iter()
        .filter(|file| !root.join(file.as_str()).is_file())
        .cloned()
        .collect();

    let mut unexpected = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| E2eError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = relative_path(root, entry.path());
        if !is_ignored(&relative) && !expected_set.contains(relative.as_str()) {
            unexpected.push(relative);
        }
    }

    Ok(FileSetReport { missing, unexpected })
}

/// Assert that `project` generated exactly `expected`
pub fn verify_file_set(project: &Project, expected: &[String]) -> E2eResult<()> {
    compare_file_set(project.output_dir(), expected)?.into_result()
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
