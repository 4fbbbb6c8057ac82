//! # SMT Term Layer
//!
//! Terms, naming of memory-model symbols, a ground evaluator used to check
//! encodings against concrete memories, and SMT-LIB export.

pub mod manager;
pub mod model;
pub mod smtlib;
pub mod term;

pub use manager::{FormulaManager, HeapEncoding, ADDRESS_PREFIX};
pub use model::{Model, Value};
pub use smtlib::to_smtlib;
pub use term::{Sort, Term};
