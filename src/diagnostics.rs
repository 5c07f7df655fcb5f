//! Non-fatal findings reported by the processing steps.
//!
//! Steps never log warnings themselves. They push [`Diagnostic`]s into a
//! [`Diagnostics`] collection owned by the caller, and the month orchestrator
//! decides how to report them (see [`crate::pipeline::log_diagnostics`]).
use std::fmt::Display;

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DiagnosticKind {
    /// A requested pressure level was not present; the nearest one was used.
    NearestLevel,
    /// Some requested variables were absent from the merged dataset.
    MissingVariables,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn nearest_level(variable: &str, requested: i64, actual: i64) -> Self {
        Self {
            kind: DiagnosticKind::NearestLevel,
            message: format!(
                "{variable}: requested {requested} hPa pressure level, using nearest {actual} hPa"
            ),
        }
    }

    pub fn missing_variables<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            kind: DiagnosticKind::MissingVariables,
            message: format!(
                "the following requested vars are missing from merged dataset \
                 and will be skipped: {}",
                names.iter().map(|n| n.as_ref()).join(", ")
            ),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// An ordered collection of diagnostics from one unit of work.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
