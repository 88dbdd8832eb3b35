//! The findings reported by the vulnerability scanner.

use std::fmt;

use aurion_errors::location::Location;
use serde::Serialize;

/// How serious a finding is.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{name}")
    }
}

/// A single finding of the scanner.
///
/// Issues order by location first so that a sorted list reads top to bottom
/// through the source.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Issue {
    pub location: Option<Location>,

    /// The identifier of the check that produced the issue, such as
    /// `reentrancy`.
    pub id:       String,
    pub severity: Severity,
    pub function: Option<String>,
    pub message:  String,
}

impl Issue {
    /// Creates an issue with no location.
    #[must_use]
    pub fn new(id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            location: None,
            id: id.into(),
            severity,
            function: None,
            message: message.into(),
        }
    }

    /// Anchors the issue at `location`.
    #[must_use]
    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Attributes the issue to the function called `function`.
    #[must_use]
    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{location}: ")?,
            None => write!(f, "-: ")?,
        }
        write!(f, "[{}] {}: {}", self.severity, self.id, self.message)
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::Location;

    use crate::issue::{Issue, Severity};

    #[test]
    fn sorts_by_location_first() {
        let mut issues = vec![
            Issue::new("b", Severity::Low, "second").at(Location::new(3, 1)),
            Issue::new("a", Severity::High, "first").at(Location::new(1, 5)),
            Issue::new("c", Severity::Medium, "unplaced"),
        ];
        issues.sort();

        let ids = issues.iter().map(|i| i.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(issues[1].to_string(), "1:5: [high] a: first");
    }
}
