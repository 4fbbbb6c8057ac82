//! # Statement Encoder
//!
//! Translates control-flow edges of a C program into constraints over the
//! typed memory model.
//!
//! - [`ast`]: the statements and expressions that are encoded
//! - [`evaluator`](EdgeEncoder::evaluate): expressions to values and locations
//! - [`assignment`](EdgeEncoder::assign): assignments, declarations and initializers
//! - [`dynamic_memory`]: allocation, deallocation and deferred typing of
//!   untyped allocations
//! - [`PointerAliasingEncoder`]: edge dispatch and path merging

pub mod ast;
mod assignment;
pub mod constraints;
pub mod context;
pub mod dynamic_memory;
mod evaluator;
pub mod expression;
pub mod orchestrator;

pub use ast::{
    BinaryOp, CExpression, CfaEdge, Declaration, EdgeKind, Initializer, UnaryOp,
};
pub use constraints::{Constraints, ErrorConditions};
pub use context::{EdgeEncoder, EdgeEncoding, EncoderContext, NONDET_PREFIX, STRING_LITERAL_PREFIX};
pub use dynamic_memory::{ALLOCATION_COUNTER, RETURN_VARIABLE};
pub use expression::{Expression, Location};
pub use orchestrator::{PathFormula, PointerAliasingEncoder};
