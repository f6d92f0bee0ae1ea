//! Serial error channel.

use probe_common::{ComponentId, ErrorCode};
use serde::Serialize;
use tracing::error;

/// One error report as it would be framed on the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Reporting component.
    pub component: ComponentId,
    /// Error code.
    pub code: ErrorCode,
    /// First parameter.
    pub arg1: u16,
    /// Second parameter.
    pub arg2: u16,
}

/// Records error reports and forwards them to the tracing subscriber.
#[derive(Debug, Default)]
pub struct SerialLog {
    reports: Vec<ErrorReport>,
}

impl SerialLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report.
    pub fn print_error(&mut self, component: ComponentId, code: ErrorCode, arg1: u16, arg2: u16) {
        error!(%component, %code, arg1, arg2, "stack error");
        self.reports.push(ErrorReport {
            component,
            code,
            arg1,
            arg2,
        });
    }

    /// All reports so far.
    #[must_use]
    pub fn reports(&self) -> &[ErrorReport] {
        &self.reports
    }

    /// Reports matching `component` and `code`.
    #[must_use]
    pub fn count(&self, component: ComponentId, code: ErrorCode) -> usize {
        self.reports
            .iter()
            .filter(|r| r.component == component && r.code == code)
            .count()
    }
}
