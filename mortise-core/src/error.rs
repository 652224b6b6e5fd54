//! Error types for mortise-core.
//!
//! Every facade operation answers with a [`ReturnCode`], the stable
//! outcome taxonomy that also flows through error callbacks. Richer
//! internal failures (metadata parsing, discovery IO) carry context in
//! dedicated error enums before collapsing to a code at the facade
//! boundary.

use std::fmt;
use thiserror::Error;

/// Outcome of a facade operation.
///
/// Converts to `bool` (`Success` is `true`) for short-circuit checks,
/// and every code maps to a stable human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnCode {
    #[default]
    Success,
    UnknownError,

    // Raised by search_for_plugins()
    SearchNothingFound,
    SearchNameAlreadyExists,
    SearchCannotParseMetadata,
    SearchListFilesError,

    // Raised by load_plugins()
    LoadDependencyBadVersion,
    LoadDependencyNotFound,
    LoadDependencyCycle,

    // Raised by unload_plugins()
    UnloadNotAll,
}

impl ReturnCode {
    /// Whether the operation succeeded.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Stable human-readable message for this code.
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnknownError => "Unknown error",
            Self::SearchNothingFound => "No plugins were found in that directory",
            Self::SearchNameAlreadyExists => "A plugin with the same name was already found",
            Self::SearchCannotParseMetadata => "Plugin metadata cannot be parsed",
            Self::SearchListFilesError => "An error occurred while scanning the plugin directory",
            Self::LoadDependencyBadVersion => {
                "The plugin requires a dependency with an incompatible version"
            }
            Self::LoadDependencyNotFound => "The plugin requires a dependency that was not found",
            Self::LoadDependencyCycle => {
                "The dependency graph contains a cycle, plugins cannot be loaded"
            }
            Self::UnloadNotAll => "Not all plugins have been unloaded",
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl From<ReturnCode> for bool {
    fn from(code: ReturnCode) -> bool {
        code.is_success()
    }
}

impl From<bool> for ReturnCode {
    fn from(ok: bool) -> ReturnCode {
        if ok {
            ReturnCode::Success
        } else {
            ReturnCode::UnknownError
        }
    }
}

/// Error callback signature for discovery and lifecycle operations.
///
/// The second argument is the offending library path when one is known.
pub type ErrorCallback = dyn FnMut(ReturnCode, Option<&str>);

/// Version string failed to parse.
#[derive(Debug, Error)]
#[error("invalid version `{input}`: {source}")]
pub struct VersionError {
    pub input: String,
    #[source]
    pub source: semver::Error,
}

/// Embedded metadata was rejected.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata is not valid UTF-8")]
    NotUtf8,

    #[error("metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("plugin API `{found}` is not compatible with host API `{host}`")]
    IncompatibleApi { found: String, host: &'static str },

    #[error("`{name}` is not a valid plugin name")]
    BadName { name: String },
}
