//! Configuration for a core run (spec §6). `Config` is the typed struct the
//! core consumes; loading operator-facing YAML into this shape is a
//! separate, out-of-scope collaborator. `Config::from_toml_file` is provided
//! as a convenience for driving the core directly (the CLI shell, tests).

use std::path::{Path, PathBuf};

use regex::bytes::Regex as BytesRegex;
use serde::Deserialize;

use crate::error::CoreError;
use crate::limits::DEFAULT_MAX_DATA_BLOCK_SIZE;

/// One `{ nameRegex, prefix }` branch mapping entry (spec §4.4, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct BranchMapping {
    pub name_regex: String,
    pub prefix: String,
}

/// One `{ pathRegex, filetype }` typemap override (spec §4.3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct TypemapEntry {
    pub path_regex: String,
    pub filetype: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub import_depot: String,
    pub import_path: Option<String>,
    pub default_branch: String,
    pub branch_mappings: Vec<BranchMapping>,
    pub typemaps: Vec<TypemapEntry>,
    pub case_insensitive: bool,
    pub convert_crlf: bool,
    pub dummy_archives: bool,
    pub archive_root: PathBuf,
    pub journal_path: PathBuf,
    pub parallel_threads: usize,
    pub max_commits: usize,
    pub graph_file: Option<PathBuf>,
    pub max_data_block_size: usize,
    /// Ambient: suppress the end-of-run summary table.
    pub quiet: bool,
    /// Ambient: optional path to write the end-of-run summary as JSON.
    pub report_json: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            import_depot: "import".to_string(),
            import_path: None,
            default_branch: "main".to_string(),
            branch_mappings: Vec::new(),
            typemaps: Vec::new(),
            case_insensitive: false,
            convert_crlf: false,
            dummy_archives: false,
            archive_root: PathBuf::from("archive"),
            journal_path: PathBuf::from("journal"),
            parallel_threads: 0,
            max_commits: 0,
            graph_file: None,
            max_data_block_size: DEFAULT_MAX_DATA_BLOCK_SIZE,
            quiet: false,
            report_json: None,
        }
    }
}

/// A `(regex, prefix)` branch mapping, compiled once at validation time.
pub struct CompiledBranchMapping {
    pub regex: BytesRegex,
    pub prefix: String,
}

/// A `(regex, filetype)` typemap override, compiled once at validation time.
pub struct CompiledTypemap {
    pub regex: BytesRegex,
    pub filetype: String,
}

/// Config plus its compiled regex tables, built once via `Config::compile`.
pub struct CompiledConfig {
    pub config: Config,
    pub branch_mappings: Vec<CompiledBranchMapping>,
    pub typemaps: Vec<CompiledTypemap>,
}

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!("failed to read config {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| CoreError::config(format!("failed to parse config {}: {e}", path.display())))
    }

    /// Validate fields and compile regex tables. Fatal misconfiguration is
    /// reported as `ConfigError` up front rather than at first use (spec §4.4).
    pub fn compile(self) -> Result<CompiledConfig, CoreError> {
        if self.import_depot.is_empty() {
            return Err(CoreError::config("importDepot must not be empty"));
        }
        if self.default_branch.is_empty() {
            return Err(CoreError::config("defaultBranch must not be empty"));
        }
        let mut branch_mappings = Vec::with_capacity(self.branch_mappings.len());
        for m in &self.branch_mappings {
            let regex = BytesRegex::new(&m.name_regex).map_err(|e| {
                CoreError::config(format!(
                    "invalid branchMappings nameRegex {:?}: {e}",
                    m.name_regex
                ))
            })?;
            branch_mappings.push(CompiledBranchMapping {
                regex,
                prefix: m.prefix.clone(),
            });
        }
        let mut typemaps = Vec::with_capacity(self.typemaps.len());
        for t in &self.typemaps {
            let regex = BytesRegex::new(&t.path_regex).map_err(|e| {
                CoreError::config(format!("invalid typemaps pathRegex {:?}: {e}", t.path_regex))
            })?;
            typemaps.push(CompiledTypemap {
                regex,
                filetype: t.filetype.clone(),
            });
        }
        Ok(CompiledConfig {
            config: self,
            branch_mappings,
            typemaps,
        })
    }
}
