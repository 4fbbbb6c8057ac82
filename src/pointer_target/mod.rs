//! Memory-model state: bases, tracked fields and aliasing targets
//!
//! - [`PointerTargetSet`]: immutable snapshot travelling with a path formula
//! - [`PointerTargetSetBuilder`]: mutable view used while one edge is encoded
//! - [`PointerTargetSetManager`]: target enumeration, ordering, sharing and merge
//! - [`PointerTargetPattern`]: targets a write may affect

pub mod builder;
pub mod deferred;
pub mod manager;
pub mod pattern;
pub mod set;
pub mod target;

pub use builder::PointerTargetSetBuilder;
pub use deferred::DeferredAllocationPool;
pub use manager::{
    MergeResult, PointerTargetSetManager, ANONYMOUS_UNION_PREFIX, FAKE_BASE_PREFIX,
    FIELD_SEPARATOR,
};
pub use pattern::PointerTargetPattern;
pub use set::{fake_base_type, is_fake_base_type, PointerTargetSet};
pub use target::{CompositeField, PointerTarget};
