//! Validation modes, options and the aggregated validation error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the machine runs; decides which sections are mandatory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Bare metal; the system is installed to a disk.
    Metal,
    /// Inside a container.
    Container,
    /// A cloud image; already installed.
    Cloud,
}

impl RuntimeMode {
    /// True if the config must describe an install target.
    pub fn requires_install(self) -> bool {
        self == RuntimeMode::Metal
    }

    /// True when running in a container.
    pub fn in_container(self) -> bool {
        self == RuntimeMode::Container
    }
}

impl Default for RuntimeMode {
    fn default() -> Self {
        RuntimeMode::Metal
    }
}

impl FromStr for RuntimeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "metal" => Ok(RuntimeMode::Metal),
            "container" => Ok(RuntimeMode::Container),
            "cloud" => Ok(RuntimeMode::Cloud),
            other => anyhow::bail!("unknown runtime mode {:?}", other),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuntimeMode::Metal => "metal",
            RuntimeMode::Container => "container",
            RuntimeMode::Cloud => "cloud",
        })
    }
}

/// A block device the install disk selector can match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Device path, e.g. `/dev/sda`.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Model string.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Kernel modalias.
    pub modalias: String,
    /// Partition table UUID.
    pub uuid: String,
    /// World wide identifier.
    pub wwid: String,
    /// `ssd`, `hdd`, `nvme` or `sd`.
    pub kind: String,
    /// Bus path.
    pub bus_path: String,
}

/// Knobs for validation.
#[derive(Clone, Debug, Default)]
pub struct ValidationOptions {
    /// Turns warnings into errors.
    pub strict: bool,
    /// Skips checks that need the local machine, like disk lookups.
    pub local: bool,
    /// Block devices present on the machine, for install disk matching.
    pub disks: Option<Vec<BlockDevice>>,
}

impl ValidationOptions {
    /// Default options with strict mode on.
    pub fn strict() -> Self {
        ValidationOptions {
            strict: true,
            ..Default::default()
        }
    }
}

/// Non fatal findings.
pub type Warnings = Vec<String>;

/// Every problem found while validating, reported together. Warnings
/// found along the way travel with it but don't show in the message.
#[derive(Debug, Clone, PartialEq, Default, thiserror::Error)]
pub struct ValidationError {
    /// One entry per problem.
    pub errors: Vec<String>,
    /// Non fatal findings.
    pub warnings: Warnings,
}

impl ValidationError {
    /// An empty error set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a problem.
    pub fn push(&mut self, error: impl ToString) {
        self.errors.push(error.to_string());
    }

    /// Adds every problem and warning of another set.
    pub fn extend(&mut self, other: ValidationError) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records a warning.
    pub fn warn(&mut self, warning: impl ToString) {
        self.warnings.push(warning.to_string());
    }

    /// Resolves the collected findings. Strict mode turns warnings into
    /// errors. Returns the warnings when no error was recorded.
    pub fn finish(mut self, strict: bool) -> Result<Warnings, ValidationError> {
        if strict && !self.warnings.is_empty() {
            let warnings = std::mem::take(&mut self.warnings);
            self.errors.extend(warnings);
        }
        if self.is_empty() {
            Ok(self.warnings)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            writeln!(f, "1 error occurred:")?;
        } else {
            writeln!(f, "{} errors occurred:", self.errors.len())?;
        }
        for error in &self.errors {
            writeln!(f, "\t* {}", error)?;
        }
        writeln!(f)
    }
}

/// Formats warnings for display, one per line with a `warning:` prefix.
pub fn format_warnings(warnings: &[String]) -> String {
    warnings.iter().map(|w| format!("warning: {}\n", w)).collect()
}
