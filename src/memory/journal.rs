use crate::core::Result;
use std::sync::{Arc, Mutex};

/// Operation performed on an in-memory connection or session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Start,
    Stop,
    Commit,
    Rollback,
    Close,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Start => write!(f, "START"),
            Operation::Stop => write!(f, "STOP"),
            Operation::Commit => write!(f, "COMMIT"),
            Operation::Rollback => write!(f, "ROLLBACK"),
            Operation::Close => write!(f, "CLOSE"),
        }
    }
}

/// One recorded operation, including attempts that failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub resource: String,
    pub operation: Operation,
    pub succeeded: bool,
}

/// Ordered record of everything an in-memory factory and its resources did
///
/// Cloning a journal yields another handle to the same record.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, resource: &str, operation: Operation, succeeded: bool) -> Result<()> {
        let mut entries = self.entries.lock()?;
        entries.push(JournalEntry {
            resource: resource.to_string(),
            operation,
            succeeded,
        });
        Ok(())
    }

    /// Snapshot of all entries in recording order
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Operations attempted on one resource, in order
    pub fn operations_on(&self, resource: &str) -> Vec<Operation> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.resource == resource)
            .map(|entry| entry.operation)
            .collect()
    }

    /// Resources on which `operation` was attempted, in order
    pub fn resources_with(&self, operation: Operation) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.operation == operation)
            .map(|entry| entry.resource)
            .collect()
    }

    /// Position of the first attempt of `operation` on `resource`
    pub fn position(&self, resource: &str, operation: Operation) -> Option<usize> {
        self.entries()
            .iter()
            .position(|entry| entry.resource == resource && entry.operation == operation)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
