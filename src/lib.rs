//! # Heapalias - Pointer-Aliasing Heap Encoder
//!
//! Translates the statements of a C program, one control-flow edge at a time,
//! into SMT constraints over a typed memory model. Every C type `T` whose
//! values are accessed through memory gets its own memory array `*T`; an
//! address is an integer, and every object living in memory (a *base*) gets a
//! unique symbolic start address `__ADDRESS_OF_<base>`.
//!
//! ## Features
//!
//! - **Demand-driven field tracking** - only fields actually accessed through
//!   memory produce targets
//! - **Persistent snapshots** - memory models are `imbl` values shared
//!   structurally between paths
//! - **Lazy allocation typing** - `void *p = malloc(n)` is typed by its first
//!   revealing use
//! - **Two heap encodings** - SMT arrays or uninterpreted functions with
//!   retention constraints
//!
//! ## Quick Start
//!
//! ```rust
//! use heapalias::encoder::{CExpression, CfaEdge};
//! use heapalias::types::{CType, TypeTable};
//! use heapalias::{EncoderOptions, PathFormula, PointerAliasingEncoder};
//! use std::sync::Arc;
//!
//! # fn main() -> heapalias::Result<()> {
//! let encoder =
//!     PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), EncoderOptions::default())?;
//!
//! // int a[3];
//! let a_type = CType::array_of(CType::int(), 3);
//! let declare = CfaEdge::declare("main", "a", a_type.clone(), None);
//! let (path, _) = encoder.make_and(&PathFormula::empty(), &declare)?;
//!
//! // a[1] = 5;
//! let a = CExpression::id("a", a_type);
//! let store = CfaEdge::assign(
//!     "main",
//!     CExpression::subscript(a, CExpression::int(1)),
//!     CExpression::int(5),
//! );
//! let (path, errors) = encoder.make_and(&path, &store)?;
//!
//! // One store into the int memory array, which moved to its next version
//! assert_eq!(path.formula().count_stores(), 1);
//! assert_eq!(path.ssa().get_index("*int"), Some(2));
//! assert!(errors.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Merging Paths
//!
//! At control-flow joins two path formulas are combined with
//! [`PointerAliasingEncoder::merge`]. The merged memory model knows every base
//! and every tracked field of both branches, and the formula is the
//! disjunction of both branches extended by the equalities that bring their
//! SSA indices in line.
//!
//! ## Error Handling
//!
//! Constructs the encoder cannot express are reported as [`Error`] values and
//! only invalidate the current path ([`ErrorSeverity::PathLocal`]);
//! cancellation through a [`ShutdownNotifier`] and invalid options are
//! [`ErrorSeverity::Fatal`]:
//!
//! ```rust
//! use heapalias::encoder::{CExpression, CfaEdge};
//! use heapalias::types::{CType, TypeTable};
//! use heapalias::{EncoderOptions, ErrorSeverity, PathFormula, PointerAliasingEncoder};
//! use std::sync::Arc;
//!
//! let encoder =
//!     PointerAliasingEncoder::new(Arc::new(TypeTable::lp64()), EncoderOptions::default())
//!         .unwrap();
//! // *x = 1; with `int x`
//! let edge = CfaEdge::assign(
//!     "main",
//!     CExpression::deref(CExpression::id("x", CType::int())),
//!     CExpression::int(1),
//! );
//! let err = encoder.make_and(&PathFormula::empty(), &edge).unwrap_err();
//! assert_eq!(err.classify(), ErrorSeverity::PathLocal);
//! ```
//!
//! Approximations that keep the encoding usable but lose precision (unknown
//! array lengths, allocations that escape untyped) are logged through
//! `tracing` at `warn` level.
//!
//! ## License
//!
//! Licensed under the [MIT License](https://opensource.org/licenses/MIT).

#![warn(missing_docs)]

/// Version of the heapalias crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod encoder;
pub mod error;
pub mod pointer_target;
pub mod shutdown;
pub mod smt;
pub mod ssa;
pub mod types;

// Re-export main types
pub use config::EncoderOptions;
pub use encoder::{ErrorConditions, PathFormula, PointerAliasingEncoder};
pub use error::{Error, ErrorSeverity, Result};
pub use pointer_target::{PointerTargetSet, PointerTargetSetManager};
pub use shutdown::ShutdownNotifier;
pub use smt::{FormulaManager, Term};
pub use ssa::SsaMap;
