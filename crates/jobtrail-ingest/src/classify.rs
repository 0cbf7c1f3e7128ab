//! Run status classification
//!
//! Maps a job history status code onto a label and a severity. The mapping is total:
//! codes the server may add later land on `undefined` with warning severity.

use serde::{Deserialize, Serialize};

/// Event severity, rendered as `xe_severity_value` / `xe_severity_keyword`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl Severity {
    pub fn value(self) -> i64 {
        self as i64
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Outcome of a job or step run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Failed,
    Succeeded,
    Retry,
    Cancelled,
    InProgress,
    Undefined,
}

impl RunStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => RunStatus::Failed,
            1 => RunStatus::Succeeded,
            2 => RunStatus::Retry,
            3 => RunStatus::Cancelled,
            4 => RunStatus::InProgress,
            _ => RunStatus::Undefined,
        }
    }

    /// Value of the `run_status_text` field
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Failed => "failed",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Retry => "retry",
            RunStatus::Cancelled => "cancelled",
            RunStatus::InProgress => "inprogress",
            RunStatus::Undefined => "undefined",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            RunStatus::Failed => Severity::Error,
            RunStatus::Succeeded | RunStatus::InProgress => Severity::Info,
            RunStatus::Retry | RunStatus::Cancelled | RunStatus::Undefined => Severity::Warning,
        }
    }

    /// Statuses shipped when only failures are requested
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Retry | RunStatus::Cancelled
        )
    }
}
