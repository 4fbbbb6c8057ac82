//! Naming and construction of memory-model terms
//!
//! All symbol names the encoder emits are produced here:
//!
//! - SSA instance `k` of a plain variable `x` is `x@k`
//! - the memory array of C type `T` is `*T` (canonical spelling), instance `k`
//!   is `*T@k`
//! - the address constant of base `b` is `__ADDRESS_OF_b`
//!
//! Memory is either an SMT array per type or an uninterpreted `Int -> Int`
//! function per type, selected by [`HeapEncoding`].

use super::term::{Sort, Term};
use crate::types::CType;
use dashmap::DashMap;

/// Prefix of base address constants
pub const ADDRESS_PREFIX: &str = "__ADDRESS_OF_";

/// Separator between a variable name and its SSA index
pub const INDEX_SEPARATOR: char = '@';

/// How memory arrays are represented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapEncoding {
    /// SMT arrays with `select`/`store`
    Arrays,
    /// Uninterpreted functions with explicit retention constraints
    UninterpretedFunctions,
}

/// Term factory for the memory model
#[derive(Debug)]
pub struct FormulaManager {
    encoding: HeapEncoding,
    memory_names: DashMap<CType, String>,
}

impl FormulaManager {
    /// Creates a manager for the given heap encoding
    pub fn new(encoding: HeapEncoding) -> Self {
        Self {
            encoding,
            memory_names: DashMap::new(),
        }
    }

    /// Heap encoding in use
    pub fn encoding(&self) -> HeapEncoding {
        self.encoding
    }

    /// Returns true when memory is modelled by SMT arrays
    pub fn uses_arrays(&self) -> bool {
        self.encoding == HeapEncoding::Arrays
    }

    /// `name@index`
    pub fn indexed_name(name: &str, index: u32) -> String {
        format!("{}{}{}", name, INDEX_SEPARATOR, index)
    }

    /// Integer variable `name@index`
    pub fn variable(&self, name: &str, index: u32) -> Term {
        Term::int_var(Self::indexed_name(name, index))
    }

    /// Address constant of a base
    pub fn base_address(&self, base: &str) -> Term {
        Term::int_var(Self::base_address_name(base))
    }

    /// `__ADDRESS_OF_<base>`
    pub fn base_address_name(base: &str) -> String {
        format!("{}{}", ADDRESS_PREFIX, base)
    }

    /// Name of the memory array holding values of `ty`; cached per canonical type
    pub fn memory_name(&self, ty: &CType) -> String {
        let key = ty.canonical();
        if let Some(name) = self.memory_names.get(&key) {
            return name.clone();
        }
        let name = format!("*{}", key.access_name());
        self.memory_names.insert(key, name.clone());
        name
    }

    /// Number of cached memory names
    pub fn cached_memory_names(&self) -> usize {
        self.memory_names.len()
    }

    /// Memory instance `*T@index` as an array term (array encoding only)
    pub fn memory(&self, memory_name: &str, index: u32) -> Term {
        Term::array_var(Self::indexed_name(memory_name, index))
    }

    /// Value stored at `address` in memory instance `*T@index`
    pub fn dereference(&self, memory_name: &str, index: u32, address: Term) -> Term {
        match self.encoding {
            HeapEncoding::Arrays => Term::select(self.memory(memory_name, index), address),
            HeapEncoding::UninterpretedFunctions => {
                Term::app(Self::indexed_name(memory_name, index), vec![address])
            }
        }
    }

    /// `new = old` over whole memory instances
    ///
    /// With uninterpreted functions this is a quantified formula; callers that
    /// must stay quantifier-free use [`memory_equality_at`].
    ///
    /// [`memory_equality_at`]: FormulaManager::memory_equality_at
    pub fn memory_equality(&self, memory_name: &str, new_index: u32, old_index: u32) -> Term {
        match self.encoding {
            HeapEncoding::Arrays => Term::eq(
                self.memory(memory_name, new_index),
                self.memory(memory_name, old_index),
            ),
            HeapEncoding::UninterpretedFunctions => {
                let i = Term::int_var("__i");
                Term::forall(
                    "__i",
                    Term::eq(
                        self.dereference(memory_name, new_index, i.clone()),
                        self.dereference(memory_name, old_index, i),
                    ),
                )
            }
        }
    }

    /// `new = old` at each of `addresses` only
    pub fn memory_equality_at(
        &self,
        memory_name: &str,
        new_index: u32,
        old_index: u32,
        addresses: impl IntoIterator<Item = Term>,
    ) -> Term {
        Term::and(addresses.into_iter().map(|address| {
            Term::eq(
                self.dereference(memory_name, new_index, address.clone()),
                self.dereference(memory_name, old_index, address),
            )
        }))
    }

    /// Fresh boolean or integer symbol (no SSA index)
    pub fn fresh_symbol(&self, name: &str, sort: Sort) -> Term {
        Term::Var {
            name: name.to_string(),
            sort,
        }
    }
}

impl Default for FormulaManager {
    fn default() -> Self {
        Self::new(HeapEncoding::Arrays)
    }
}
