//! Error types for the heapalias encoder

use thiserror::Error;

/// Encoder errors
///
/// Every variant aborts the encoding of the current CFA edge only. Internal
/// invariant violations are not represented here: they panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Unsupported input
    /// A C construct the encoder does not understand
    ///
    /// **Triggered by:** malformed or unsupported expressions and statements
    /// **Example:** `s.f` where `s` evaluates to a plain value (a struct returned by a call)
    #[error("Unrecognized C code: {message} (in `{location}`)")]
    UnrecognizedCode {
        /// Description of the problem
        message: String,
        /// Offending edge or expression, rendered as C
        location: String,
    },

    /// Left and right side of an assignment have incompatible shapes
    ///
    /// **Triggered by:** assigning a composite to a scalar, an array of a different
    /// element type to an array, or an array to an unaliased location
    /// **Example:** `int x; struct s v; x = v;`
    #[error("Incompatible assignment: cannot assign {rhs} to {lhs}")]
    IncompatibleAssignment {
        /// Left-hand side type
        lhs: String,
        /// Right-hand side type
        rhs: String,
    },

    /// Dereference of an expression that is not a pointer
    #[error("Dereference of non-pointer expression `{expression}` of type {ty}")]
    InvalidDereference {
        /// The dereferenced expression
        expression: String,
        /// Its type
        ty: String,
    },

    /// Two different untyped allocations would have to be resolved from one assignment
    ///
    /// **Triggered by:** an assignment to a pointer of revealing type whose right-hand
    /// side mixes pointers of more than one deferred allocation
    #[error("Ambiguous untyped allocations {pools:?} in `{location}`")]
    AmbiguousAllocation {
        /// Base names of the involved allocations
        pools: Vec<String>,
        /// Offending edge
        location: String,
    },

    /// Wrong number of arguments to a memory management function
    #[error("Wrong number of arguments for {function}: expected {expected}, got {got}")]
    InvalidCallArity {
        /// Called function
        function: String,
        /// Expected argument count
        expected: usize,
        /// Actual argument count
        got: usize,
    },

    /// A type query failed (incomplete composite, sizeof of a function)
    #[error("Type error: {0}")]
    TypeError(String),

    // Control
    /// Encoding was cancelled through the shutdown notifier
    #[error("Encoding cancelled: {reason}")]
    Cancelled {
        /// Reason given when shutdown was requested
        reason: String,
    },

    // Setup
    /// Malformed encoder options
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The whole analysis must stop
    Fatal,
    /// Only the current path is lost; other paths may still be explored
    PathLocal,
}

impl Error {
    /// Create an unrecognized-code error for the given construct
    pub fn unrecognized(msg: impl Into<String>, location: impl ToString) -> Self {
        Error::UnrecognizedCode {
            message: msg.into(),
            location: location.to_string(),
        }
    }

    /// Create an incompatible-assignment error from the two rendered types
    pub fn incompatible(lhs: impl ToString, rhs: impl ToString) -> Self {
        Error::IncompatibleAssignment {
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::Cancelled { .. } => ErrorSeverity::Fatal,
            Error::Configuration(_) => ErrorSeverity::Fatal,

            Error::UnrecognizedCode { .. } => ErrorSeverity::PathLocal,
            Error::IncompatibleAssignment { .. } => ErrorSeverity::PathLocal,
            Error::InvalidDereference { .. } => ErrorSeverity::PathLocal,
            Error::AmbiguousAllocation { .. } => ErrorSeverity::PathLocal,
            Error::InvalidCallArity { .. } => ErrorSeverity::PathLocal,
            Error::TypeError(_) => ErrorSeverity::PathLocal,
        }
    }

    /// Returns true for a cancellation request
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type for heapalias operations
pub type Result<T> = std::result::Result<T, Error>;
