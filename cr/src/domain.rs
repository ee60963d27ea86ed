//! Domain types for the reload pipeline
//!
//! Identifiers are thin string newtypes so a subject can never be passed where
//! a unit or a step name is expected.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Serialization and coalescing key for reload requests
    Subject
);

string_id!(
    /// A loadable unit known to the module loader
    UnitId
);

string_id!(
    /// One named step of the build backend's pipeline
    StepName
);

/// Outcome reported by a single build step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The step compiled something
    Ok,
    /// The step had nothing to do
    Noop,
    /// The step failed
    Error,
}

/// Aggregate status of a reload attempt as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStatus {
    Ok,
    Error,
}

impl ReloadStatus {
    pub fn is_ok(self) -> bool {
        self == ReloadStatus::Ok
    }
}

/// Result of one reload attempt, broadcast to every coalesced caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: ReloadStatus,
    pub output: String,
}

impl BuildResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            status: ReloadStatus::Ok,
            output: output.into(),
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            status: ReloadStatus::Error,
            output: output.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Extract the headline of a failed build for display
    ///
    /// Looks for the first `** (Kind) message` line in the captured output.
    pub fn headline(&self) -> Headline {
        Headline::extract(&self.output)
    }
}

const DEFAULT_HEADLINE_KIND: &str = "BuildError";
const DEFAULT_HEADLINE_MESSAGE: &str = "Build failed";

static HEADLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\*\* \(([\w.:]+)\) (.*?)\r?$").expect("headline regex is valid"));

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ansi regex is valid"));

/// First-line summary of a build failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headline {
    pub kind: String,
    pub message: String,
}

impl Headline {
    pub fn extract(output: &str) -> Self {
        let clean = strip_ansi(output);
        HEADLINE_RE
            .captures(&clean)
            .map(|caps| Self {
                kind: caps[1].to_string(),
                message: caps[2].trim().to_string(),
            })
            .unwrap_or_default()
    }
}

impl Default for Headline {
    fn default() -> Self {
        Self {
            kind: DEFAULT_HEADLINE_KIND.to_string(),
            message: DEFAULT_HEADLINE_MESSAGE.to_string(),
        }
    }
}

/// Remove ANSI color escapes from captured output
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}
