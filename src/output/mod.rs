//! Output naming and verification

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod verifier;

pub use verifier::OutputVerifier;

/// Suffix added to the source stem when no output path is given
const DEFAULT_SUFFIX: &str = "_transcoded";

/// Default destination: `<stem>_transcoded.<container>` next to the source
pub fn default_output_path(source: &Path, container: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    source.with_file_name(format!("{}{}.{}", stem, DEFAULT_SUFFIX, container))
}

/// Outcome of verifying a produced file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Verified file
    pub path: PathBuf,
    /// True when every check passed
    pub success: bool,
    /// Measured container duration
    pub duration: f64,
    /// Individual checks, in the order they ran
    pub checks: Vec<VerificationCheck>,
}

impl VerificationReport {
    /// Checks that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &VerificationCheck> {
        self.checks.iter().filter(|check| !check.success)
    }
}

/// One verification check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationCheck {
    /// What was checked
    pub check_type: String,
    /// Expected and actual values
    pub details: String,
    pub success: bool,
}

impl VerificationCheck {
    pub fn new(check_type: impl Into<String>, success: bool, details: impl Into<String>) -> Self {
        Self {
            check_type: check_type.into(),
            details: details.into(),
            success,
        }
    }
}
