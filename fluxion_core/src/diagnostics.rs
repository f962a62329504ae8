//! Diagnostics sink collecting structured solver messages
//!
//! The solver reports through an explicit handle instead of a process global
//! logger. Records are kept in insertion order and each one is mirrored to the
//! `log` facade, so embedding applications still see messages through their
//! usual subscriber while tests can assert against the collected records.

use std::cell::RefCell;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// Severity of a diagnostic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single diagnostic record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub severity: Severity,
    pub message: String,
}

/// Handle to an ordered collection of diagnostic records
///
/// Cloning the handle shares the underlying record list, so a solver and the
/// code inspecting it can hold the same sink.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    records: Rc<RefCell<Vec<Record>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics {
            records: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Append a record and mirror it to the `log` facade
    pub fn push(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Debug => log::debug!("{}", message),
            Severity::Info => log::info!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Error => log::error!("{}", message),
        }
        self.records.borrow_mut().push(Record { severity, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.push(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    /// All records collected so far, in insertion order
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    /// Messages of all records with the given severity
    pub fn messages_with_severity(&self, severity: Severity) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.severity == severity)
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages_with_severity(Severity::Warning)
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages_with_severity(Severity::Error)
    }

    /// Whether any record's message contains `needle`
    pub fn has_message_containing(&self, needle: &str) -> bool {
        self.records
            .borrow()
            .iter()
            .any(|r| r.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::diagnostics::{Diagnostics, Severity};

    #[test]
    fn test_push_and_filter() {
        let diag = Diagnostics::new();
        diag.info("starting");
        diag.warning("rank deficiency detected");
        diag.error("unknown variable v9");
        assert_eq!(diag.len(), 3);
        assert_eq!(diag.warnings(), vec!["rank deficiency detected".to_string()]);
        assert_eq!(diag.errors(), vec!["unknown variable v9".to_string()]);
        assert_eq!(diag.records()[0].severity, Severity::Info);
    }

    #[test]
    fn test_shared_handle() {
        let diag = Diagnostics::new();
        let shared = diag.clone();
        shared.warning("shared message");
        assert!(diag.has_message_containing("shared"));
        diag.clear();
        assert!(shared.is_empty());
    }

    #[test]
    fn test_message_search() {
        let diag = Diagnostics::new();
        diag.info("size of NET constraint system is (2x3)");
        assert!(diag.has_message_containing("NET constraint system"));
        assert!(!diag.has_message_containing("XCH"));
    }
}
