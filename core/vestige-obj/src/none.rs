//! The absorbing sentinel.
//!
//! Traversals over a torn image fail constantly and boringly; the
//! none-object soaks those failures up so chains like
//! `proc.field("Pcb").field("DirectoryTableBase")` stay total. Every
//! operation on a none-object yields another none-object carrying a
//! reason; numeric conversion is zero, truthiness false. This is a local
//! pattern of the object engine, not a general null.

use std::sync::Arc;

/// Reason-carrying absorbing sentinel.
#[derive(Clone, Debug)]
pub struct NoneObject {
    reason: Arc<str>,
}

impl NoneObject {
    #[must_use]
    pub fn new(reason: impl AsRef<str>) -> Self {
        Self {
            reason: Arc::from(reason.as_ref()),
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Derive a follow-up sentinel, keeping the original cause in the
    /// trail.
    #[must_use]
    pub fn chain(&self, context: &str) -> Self {
        Self::new(format!("{context}: {}", self.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chains_keep_the_cause() {
        let none = NoneObject::new("pde not present");
        let derived = none.chain("reading ImageFileName");
        assert_eq!(derived.reason(), "reading ImageFileName: pde not present");
    }
}
