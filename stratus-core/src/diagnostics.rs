//! Diagnostics accumulated over one operation
//!
//! Independent sub-steps (e.g. reading the ACL, CORS and website of one
//! bucket) keep going after a failure so the user sees every problem at once.

use std::fmt;

use crate::provider::{ErrorKind, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", label, self.summary)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    /// Most severe error kind seen, used when collapsing into one error
    kind: Option<ErrorKind>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, summary: impl Into<String>, detail: Option<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail,
        });
        self.kind.get_or_insert(ErrorKind::Remote);
    }

    pub fn warning(&mut self, summary: impl Into<String>, detail: Option<String>) {
        self.entries.push(Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            detail,
        });
    }

    /// Record a provider error, keeping its classification
    pub fn push_error(&mut self, err: ProviderError) {
        let detail = err.cause.as_ref().map(|c| c.to_string());
        self.entries.push(Diagnostic {
            severity: Severity::Error,
            summary: err.message,
            detail,
        });
        // The first classified error decides how the whole operation is reported
        match self.kind {
            None | Some(ErrorKind::Remote) => self.kind = Some(err.kind),
            Some(_) => {}
        }
    }

    /// Keep the value of a fallible sub-step, recording its error
    pub fn collect<T>(&mut self, result: Result<T, ProviderError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push_error(e);
                None
            }
        }
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Collapse into a single error if any error was recorded
    pub fn into_result(self) -> Result<(), ProviderError> {
        if !self.has_errors() {
            return Ok(());
        }
        let message = self
            .entries
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ProviderError::new(message).with_kind(self.kind.unwrap_or(ErrorKind::Remote)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_ok() {
        assert!(Diagnostics::new().into_result().is_ok());
    }

    #[test]
    fn warnings_alone_are_ok() {
        let mut diags = Diagnostics::new();
        diags.warning("website endpoint not reported", None);
        assert_eq!(diags.warnings().count(), 1);
        assert!(diags.into_result().is_ok());
    }

    #[test]
    fn errors_are_accumulated() {
        let mut diags = Diagnostics::new();
        assert_eq!(diags.collect::<()>(Err(ProviderError::new("reading CORS"))), None);
        assert_eq!(diags.collect(Ok(3)), Some(3));
        diags.push_error(ProviderError::timeout("waiting for lifecycle"));

        let err = diags.into_result().unwrap_err();
        assert!(err.message.contains("reading CORS"));
        assert!(err.message.contains("waiting for lifecycle"));
        assert_eq!(err.kind, ErrorKind::Timeout);
    }
}
