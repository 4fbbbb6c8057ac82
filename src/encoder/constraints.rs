//! Constraint accumulation and memory-safety side conditions

use crate::smt::Term;
use serde::Serialize;

/// Conjunction being collected for one edge
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    parts: Vec<Term>,
}

impl Constraints {
    /// Empty conjunction
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a conjunct; `true` is dropped
    pub fn add(&mut self, term: Term) {
        if !term.is_true() {
            self.parts.push(term);
        }
    }

    /// Number of non-trivial conjuncts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Returns true if nothing was added
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The conjunction
    pub fn into_term(self) -> Term {
        Term::and(self.parts)
    }
}

/// Memory-safety conditions registered while an edge is encoded
///
/// The encoder only reports them; checking whether they are satisfiable on a
/// path is the job of the analysis consuming the encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorConditions {
    invalid_deref: Vec<Term>,
    invalid_free: Vec<Term>,
}

impl ErrorConditions {
    /// No conditions
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a condition under which a dereference is invalid
    pub fn add_invalid_deref(&mut self, condition: Term) {
        if !condition.is_false() {
            self.invalid_deref.push(condition);
        }
    }

    /// Registers a condition under which a `free` is invalid
    pub fn add_invalid_free(&mut self, condition: Term) {
        if !condition.is_false() {
            self.invalid_free.push(condition);
        }
    }

    /// Disjunction of all invalid-dereference conditions
    pub fn invalid_deref(&self) -> Term {
        Term::or(self.invalid_deref.iter().cloned())
    }

    /// Disjunction of all invalid-free conditions
    pub fn invalid_free(&self) -> Term {
        Term::or(self.invalid_free.iter().cloned())
    }

    /// Returns true if no condition was registered
    pub fn is_empty(&self) -> bool {
        self.invalid_deref.is_empty() && self.invalid_free.is_empty()
    }
}
