//! Encoder configuration
//!
//! All resource bounds of the encoder are explicit options here. Options can be
//! built in code (`EncoderOptions::default()` plus field updates) or loaded from
//! JSON, where every missing field falls back to its default.
//!
//! ```
//! use heapalias::EncoderOptions;
//!
//! let options = EncoderOptions::from_json_str(r#"{ "default_array_length": 4 }"#).unwrap();
//! assert_eq!(options.default_array_length, 4);
//! assert!(options.defer_untyped_allocations);
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Options controlling the pointer-aliasing encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderOptions {
    /// Number of elements assumed for arrays without a statically known length
    pub default_array_length: u64,

    /// Upper bound on the number of elements expanded for any array
    pub max_array_length: u64,

    /// Byte size used for allocations whose size cannot be determined
    pub default_allocation_size: u64,

    /// Objects at most this large get all their fields tracked at registration
    /// (0 disables eager tracking)
    pub max_prefilled_allocation_size: u64,

    /// Use the pointer type on the left of `p = malloc(..)` to type the allocation
    pub reveal_allocation_type_from_lhs: bool,

    /// Park allocations of unknown type until a cast or assignment reveals it
    pub defer_untyped_allocations: bool,

    /// Expand C's implicit zero initialization (globals, partial initializer lists)
    pub handle_implicit_initialization: bool,

    /// Expand string-literal initializers of character arrays per character
    pub handle_string_literal_initializers: bool,

    /// Give every function a unique address constant
    pub track_function_pointers: bool,

    /// Emit invalid-dereference and invalid-free side conditions
    pub track_memory_errors: bool,

    /// Model memory as SMT arrays (otherwise as uninterpreted functions with
    /// retention constraints)
    pub use_arrays_for_heap: bool,

    /// Allow quantified bulk initialization of arrays
    pub use_quantifiers_on_arrays: bool,

    /// Allocation calls never return the null pointer
    pub memory_allocations_always_succeed: bool,

    /// Allocation functions
    pub memory_allocation_functions: Vec<String>,

    /// Allocation functions that zero the returned memory
    pub memory_zeroing_allocation_functions: Vec<String>,

    /// Deallocation functions
    pub memory_free_functions: Vec<String>,

    /// Calls to functions starting with this prefix produce unconstrained values
    pub nondet_function_prefix: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            default_array_length: 20,
            max_array_length: 100,
            default_allocation_size: 4,
            max_prefilled_allocation_size: 0,
            reveal_allocation_type_from_lhs: true,
            defer_untyped_allocations: true,
            handle_implicit_initialization: true,
            handle_string_literal_initializers: false,
            track_function_pointers: true,
            track_memory_errors: false,
            use_arrays_for_heap: true,
            use_quantifiers_on_arrays: false,
            memory_allocations_always_succeed: false,
            memory_allocation_functions: vec![
                "malloc".to_string(),
                "__kmalloc".to_string(),
                "kmalloc".to_string(),
                "alloca".to_string(),
                "__builtin_alloca".to_string(),
            ],
            memory_zeroing_allocation_functions: vec!["calloc".to_string(), "kzalloc".to_string()],
            memory_free_functions: vec!["free".to_string(), "kfree".to_string()],
            nondet_function_prefix: "__VERIFIER_nondet_".to_string(),
        }
    }
}

impl EncoderOptions {
    /// Parse options from a JSON object
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: EncoderOptions =
            serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check option consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_array_length == 0 {
            return Err(Error::Configuration(
                "max_array_length must be positive".to_string(),
            ));
        }
        if self.default_array_length > self.max_array_length {
            return Err(Error::Configuration(format!(
                "default_array_length ({}) exceeds max_array_length ({})",
                self.default_array_length, self.max_array_length
            )));
        }
        if self.default_allocation_size == 0 {
            return Err(Error::Configuration(
                "default_allocation_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true if `name` allocates memory (zeroing or not)
    pub fn is_allocation_function(&self, name: &str) -> bool {
        self.memory_allocation_functions.iter().any(|f| f == name)
            || self.is_zeroing_allocation_function(name)
    }

    /// Returns true if `name` allocates zeroed memory
    pub fn is_zeroing_allocation_function(&self, name: &str) -> bool {
        self.memory_zeroing_allocation_functions
            .iter()
            .any(|f| f == name)
    }

    /// Returns true if `name` releases memory
    pub fn is_free_function(&self, name: &str) -> bool {
        self.memory_free_functions.iter().any(|f| f == name)
    }

    /// Returns true if calls to `name` yield unconstrained values
    pub fn is_nondet_function(&self, name: &str) -> bool {
        !self.nondet_function_prefix.is_empty() && name.starts_with(&self.nondet_function_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = EncoderOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.is_allocation_function("malloc"));
        assert!(options.is_allocation_function("calloc"));
        assert!(options.is_zeroing_allocation_function("calloc"));
        assert!(!options.is_zeroing_allocation_function("malloc"));
        assert!(options.is_free_function("free"));
        assert!(options.is_nondet_function("__VERIFIER_nondet_int"));
        assert!(!options.is_nondet_function("rand"));
    }

    #[test]
    fn test_json_overrides() {
        let options = EncoderOptions::from_json_str(
            r#"{
                "use_arrays_for_heap": false,
                "memory_free_functions": ["release"]
            }"#,
        )
        .unwrap();
        assert!(!options.use_arrays_for_heap);
        assert!(options.is_free_function("release"));
        assert!(!options.is_free_function("free"));
        assert_eq!(options.default_allocation_size, 4);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = EncoderOptions::from_json_str(r#"{ "default_array_length": 500 }"#).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = EncoderOptions::from_json_str("not json").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
