//! Error types and handling for krmpack
//!
//! Uses `thiserror` for error definitions and `miette` for pretty diagnostics.
//! Every error kind carries a stable diagnostic code (`krmpack::<area>::<kind>`)
//! so presentation layers can key message templates off the kind without
//! string-matching.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::results::Severity;

/// Main error type for krmpack operations
#[derive(Error, Diagnostic, Debug)]
pub enum KrmpackError {
    // Manifest errors
    #[error("No Kptfile found in package: {path}")]
    #[diagnostic(
        code(krmpack::manifest::missing),
        help("Every package directory must contain a Kptfile at its root")
    )]
    ManifestMissing { path: String },

    #[error("Kptfile at {path} uses deprecated apiVersion '{api_version}'")]
    #[diagnostic(
        code(krmpack::manifest::deprecated),
        help("Only kpt.dev/v1 manifests are supported; migrate the package before rendering")
    )]
    ManifestDeprecated { path: String, api_version: String },

    #[error("File {path} declares apiVersion kpt.dev/v1 but kind '{kind}'")]
    #[diagnostic(code(krmpack::manifest::unknown_kind))]
    ManifestUnknownKind { path: String, kind: String },

    #[error("Failed to parse Kptfile at {path}: {reason}")]
    #[diagnostic(code(krmpack::manifest::parse_failed))]
    ManifestParse { path: String, reason: String },

    // Reader / writer errors
    #[error("Failed to parse {path}:{line}: {reason}")]
    #[diagnostic(
        code(krmpack::pkg::input_parse),
        help("Fix the YAML syntax error or add the file to .krmignore")
    )]
    InputParse {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Two resources claim the same location {path}[{index}]")]
    #[diagnostic(
        code(krmpack::pkg::output_collision),
        help(
            "A function emitted conflicting path/index annotations; resources within one file must have distinct indices"
        )
    )]
    OutputCollision { path: String, index: usize },

    #[error("Symlink {path} escapes the package root")]
    #[diagnostic(
        code(krmpack::pkg::symlink_escape),
        help("Resolve the symlink before running, or remove it from the package")
    )]
    SymlinkEscape { path: String },

    // Function spec errors
    #[error("Function declaration is invalid: {reason}")]
    #[diagnostic(
        code(krmpack::fnspec::invalid),
        help("A function must declare exactly one of 'image' or 'exec'")
    )]
    InvalidFunctionSpec { reason: String },

    #[error("Invalid function image reference: {image}")]
    #[diagnostic(code(krmpack::fnspec::invalid_image))]
    InvalidImage { image: String },

    #[error("Invalid exec command line: {command}: {reason}")]
    #[diagnostic(code(krmpack::fnspec::invalid_exec))]
    InvalidExec { command: String, reason: String },

    #[error("Function config not found: {path}")]
    #[diagnostic(code(krmpack::fnspec::config_not_found))]
    FunctionConfigNotFound { path: String },

    // Runtime errors
    #[error("Function {name} failed with exit code {exit_code}")]
    #[diagnostic(code(krmpack::fn_::execution_failed))]
    FunctionExecution {
        name: String,
        exit_code: i32,
        stderr_tail: String,
        results: Vec<crate::results::FunctionResult>,
    },

    #[error("Function {name} emitted a malformed ResourceList: {reason}")]
    #[diagnostic(
        code(krmpack::fn_::output_invalid),
        help("Functions must write a config.kubernetes.io/v1 ResourceList to stdout")
    )]
    FunctionOutput { name: String, reason: String },

    #[error("Function {name} timed out after {seconds}s")]
    #[diagnostic(code(krmpack::fn_::timeout))]
    FunctionTimeout { name: String, seconds: u64 },

    #[error("Function run cancelled")]
    #[diagnostic(code(krmpack::fn_::cancelled))]
    Cancelled,

    #[error("Container runtime unavailable: {reason}")]
    #[diagnostic(
        code(krmpack::fn_::runtime_unavailable),
        help("Container functions require a working 'docker' binary on PATH")
    )]
    RuntimeUnavailable { reason: String },

    // Selector errors
    #[error("Invalid selector: {reason}")]
    #[diagnostic(
        code(krmpack::selector::invalid),
        help("A selector must constrain at least one of apiVersion, kind, name, namespace, annotations or labels")
    )]
    SelectorInvalid { reason: String },

    // Pipeline errors
    #[error("{count} validator result(s) of severity 'error'")]
    #[diagnostic(
        code(krmpack::pipeline::validation_failed),
        help("Inspect the results (or --results-dir output) for the failing validators")
    )]
    ValidationFailed {
        count: usize,
        results: Vec<crate::results::FunctionResult>,
    },

    // Merge errors
    #[error("Merge conflict at {resource}: {field}")]
    #[diagnostic(code(krmpack::merge::conflict))]
    MergeConflict { resource: String, field: String },

    #[error("Local package has diverged from upstream; fast-forward is not possible")]
    #[diagnostic(
        code(krmpack::merge::fast_forward_failed),
        help("Use the resource-merge strategy to reconcile local edits with upstream changes")
    )]
    LocalChangesPreventFastForward,

    // Upstream errors
    #[error("Failed to fetch upstream {repo}@{reference}: {reason}")]
    #[diagnostic(code(krmpack::upstream::fetch_failed))]
    UpstreamFetch {
        repo: String,
        reference: String,
        reason: String,
    },

    #[error("Package has no upstream declared")]
    #[diagnostic(
        code(krmpack::upstream::missing),
        help("The Kptfile must declare an 'upstream' section before 'update' can run")
    )]
    UpstreamMissing,

    // File system errors
    #[error("Failed to read file: {path}")]
    #[diagnostic(code(krmpack::fs::read_failed))]
    FileReadFailed { path: String, reason: String },

    #[error("Failed to write file: {path}")]
    #[diagnostic(code(krmpack::fs::write_failed))]
    FileWriteFailed { path: String, reason: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(krmpack::fs::io_error))]
    IoError { message: String },

    #[error("Not a directory: {path}")]
    #[diagnostic(code(krmpack::fs::not_a_directory))]
    NotADirectory { path: String },
}

impl KrmpackError {
    /// Process exit code for this error kind.
    ///
    /// 2 is reserved for configuration and usage errors, 1 for validation and
    /// escalated merge failures. Function failures propagate the function's
    /// own exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            KrmpackError::ManifestMissing { .. }
            | KrmpackError::ManifestDeprecated { .. }
            | KrmpackError::ManifestUnknownKind { .. }
            | KrmpackError::ManifestParse { .. }
            | KrmpackError::InvalidFunctionSpec { .. }
            | KrmpackError::InvalidImage { .. }
            | KrmpackError::InvalidExec { .. }
            | KrmpackError::FunctionConfigNotFound { .. }
            | KrmpackError::SelectorInvalid { .. }
            | KrmpackError::UpstreamMissing
            | KrmpackError::NotADirectory { .. } => 2,
            KrmpackError::FunctionExecution { exit_code, .. } => {
                if *exit_code > 0 {
                    *exit_code
                } else {
                    1
                }
            }
            _ => 1,
        }
    }

    pub fn function_execution(
        name: impl Into<String>,
        exit_code: i32,
        stderr_tail: impl Into<String>,
        results: Vec<crate::results::FunctionResult>,
    ) -> Self {
        KrmpackError::FunctionExecution {
            name: name.into(),
            exit_code,
            stderr_tail: stderr_tail.into(),
            results,
        }
    }

    pub fn file_read(path: &std::path::Path, err: &std::io::Error) -> Self {
        KrmpackError::FileReadFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn file_write(path: &std::path::Path, err: &std::io::Error) -> Self {
        KrmpackError::FileWriteFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    pub fn validation_failed(results: Vec<crate::results::FunctionResult>) -> Self {
        let count = results
            .iter()
            .filter(|r| r.severity == Severity::Error)
            .count();
        KrmpackError::ValidationFailed { count, results }
    }

    pub fn manifest_parse(path: &std::path::Path, reason: impl Into<String>) -> Self {
        KrmpackError::ManifestParse {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn symlink_escape(path: PathBuf) -> Self {
        KrmpackError::SymlinkEscape {
            path: path.display().to_string(),
        }
    }
}

impl From<std::io::Error> for KrmpackError {
    fn from(err: std::io::Error) -> Self {
        KrmpackError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for KrmpackError {
    fn from(err: serde_yaml::Error) -> Self {
        KrmpackError::InputParse {
            path: "unknown".to_string(),
            line: err.location().map(|l| l.line()).unwrap_or(0),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for KrmpackError {
    fn from(err: serde_json::Error) -> Self {
        KrmpackError::InputParse {
            path: "unknown".to_string(),
            line: err.line(),
            reason: err.to_string(),
        }
    }
}

impl From<git2::Error> for KrmpackError {
    fn from(err: git2::Error) -> Self {
        KrmpackError::UpstreamFetch {
            repo: "unknown".to_string(),
            reference: "unknown".to_string(),
            reason: err.message().to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, KrmpackError>;
