//! Shared encoder services and per-edge encoding state
//!
//! [`EncoderContext`] bundles the narrow services every component needs (type
//! queries, term factory, memory-model algorithms, options, cancellation).
//! [`EdgeEncoder`] is the mutable state of one edge being translated; the
//! evaluator, assignment and dynamic-memory components are implemented as
//! methods on it in their own modules.

use super::constraints::{Constraints, ErrorConditions};
use super::expression::Location;
use crate::config::EncoderOptions;
use crate::pointer_target::{
    CompositeField, PointerTargetPattern, PointerTargetSet, PointerTargetSetBuilder,
    PointerTargetSetManager,
};
use crate::shutdown::ShutdownNotifier;
use crate::smt::{FormulaManager, HeapEncoding, Term};
use crate::ssa::{SsaMap, SsaMapBuilder};
use crate::types::{CType, TypeService};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Prefix of the unconstrained symbols standing for nondeterministic values
pub const NONDET_PREFIX: &str = "__nondet_";

/// Prefix of the read-only bases holding string literals
pub const STRING_LITERAL_PREFIX: &str = "__string_literal_";

/// Services shared by all edges encoded with one configuration
#[derive(Debug)]
pub struct EncoderContext {
    options: Arc<EncoderOptions>,
    types: Arc<dyn TypeService>,
    fm: Arc<FormulaManager>,
    manager: PointerTargetSetManager,
    addressed_variables: BTreeSet<String>,
    nondet_symbols: AtomicU64,
    string_literals: AtomicU64,
}

impl EncoderContext {
    /// Creates a context; the options are validated first
    pub fn new(
        types: Arc<dyn TypeService>,
        options: EncoderOptions,
        shutdown: ShutdownNotifier,
    ) -> Result<Self> {
        options.validate()?;
        let encoding = if options.use_arrays_for_heap {
            HeapEncoding::Arrays
        } else {
            HeapEncoding::UninterpretedFunctions
        };
        let options = Arc::new(options);
        let fm = Arc::new(FormulaManager::new(encoding));
        let manager =
            PointerTargetSetManager::new(types.clone(), fm.clone(), options.clone(), shutdown);
        Ok(Self {
            options,
            types,
            fm,
            manager,
            addressed_variables: BTreeSet::new(),
            nondet_symbols: AtomicU64::new(0),
            string_literals: AtomicU64::new(0),
        })
    }

    /// Declares variables whose address is taken somewhere in the program;
    /// they live in memory from their declaration on
    pub fn set_addressed_variables(&mut self, names: impl IntoIterator<Item = String>) {
        self.addressed_variables = names.into_iter().collect();
    }

    /// Options
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Type service
    pub fn types(&self) -> &dyn TypeService {
        self.types.as_ref()
    }

    /// Term factory
    pub fn fm(&self) -> &FormulaManager {
        &self.fm
    }

    /// Memory-model algorithms
    pub fn manager(&self) -> &PointerTargetSetManager {
        &self.manager
    }

    /// Cancellation flag
    pub fn shutdown(&self) -> &ShutdownNotifier {
        self.manager.shutdown()
    }

    /// Returns true if `name` was declared address-taken
    pub fn is_addressed_variable(&self, name: &str) -> bool {
        self.addressed_variables.contains(name)
    }

    fn next_nondet(&self) -> u64 {
        self.nondet_symbols.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_string_literal(&self) -> u64 {
        self.string_literals.fetch_add(1, Ordering::SeqCst)
    }
}

/// Writes to one memory array collected during a statement
#[derive(Debug, Clone)]
pub(crate) struct PendingWrites {
    pub(crate) ty: CType,
    pub(crate) old_index: u32,
    /// `store` chain on top of the old instance (array encoding)
    pub(crate) chain: Option<Term>,
    pub(crate) writes: Vec<(Term, Term)>,
    pub(crate) patterns: Vec<PointerTargetPattern>,
}

/// Result of encoding one edge
#[derive(Debug, Clone)]
pub struct EdgeEncoding {
    /// Constraint of the edge
    pub formula: Term,
    /// SSA map after the edge
    pub ssa: SsaMap,
    /// Memory model after the edge
    pub pts: PointerTargetSet,
    /// Memory-safety side conditions
    pub errors: ErrorConditions,
}

/// Mutable state while one edge is translated
#[derive(Debug)]
pub struct EdgeEncoder<'a> {
    pub(crate) ctx: &'a EncoderContext,
    pub(crate) function: String,
    pub(crate) pts: PointerTargetSetBuilder<'a>,
    pub(crate) ssa: SsaMapBuilder,
    pub(crate) constraints: Constraints,
    pub(crate) errors: ErrorConditions,
    pub(crate) pending: BTreeMap<String, PendingWrites>,
    /// Fields read, written or addressed through memory
    pub(crate) essential_fields: Vec<(CType, String)>,
    /// Deferred-allocation pointers read in the current statement, with the
    /// type a cast revealed for them
    pub(crate) used_deferred: BTreeMap<String, Option<CType>>,
}

impl<'a> EdgeEncoder<'a> {
    /// Starts encoding an edge of `function` on top of the given state
    pub fn new(
        ctx: &'a EncoderContext,
        function: impl Into<String>,
        pts: &PointerTargetSet,
        ssa: &SsaMap,
    ) -> Self {
        Self {
            ctx,
            function: function.into(),
            pts: PointerTargetSetBuilder::new(pts, ctx.manager()),
            ssa: ssa.builder(),
            constraints: Constraints::new(),
            errors: ErrorConditions::new(),
            pending: BTreeMap::new(),
            essential_fields: Vec::new(),
            used_deferred: BTreeMap::new(),
        }
    }

    pub(crate) fn options(&self) -> &'a EncoderOptions {
        self.ctx.options()
    }

    pub(crate) fn types(&self) -> &'a dyn TypeService {
        self.ctx.types()
    }

    pub(crate) fn fm(&self) -> &'a FormulaManager {
        self.ctx.fm()
    }

    /// Memory-model builder of this edge
    pub fn pts(&self) -> &PointerTargetSetBuilder<'a> {
        &self.pts
    }

    /// SSA builder of this edge
    pub fn ssa(&self) -> &SsaMapBuilder {
        &self.ssa
    }

    /// Adds a conjunct to the edge formula
    pub fn add_constraint(&mut self, term: Term) {
        self.constraints.add(term);
    }

    /// Variables live in memory if they are already bases, were declared
    /// address-taken, or contain an array
    pub fn is_aliased_variable(&self, name: &str, ty: &CType) -> bool {
        self.pts.is_base(name)
            || self.ctx.is_addressed_variable(name)
            || self.contains_array(ty)
    }

    fn contains_array(&self, ty: &CType) -> bool {
        match self.types().simplify(ty) {
            CType::Array { .. } => true,
            CType::Composite(def) => def.members.iter().any(|m| self.contains_array(&m.ty)),
            _ => false,
        }
    }

    /// Registers a base (or shares a prepared one) and keeps its ordering constraint
    pub(crate) fn ensure_base(&mut self, name: &str, ty: &CType) -> Result<()> {
        let inequality = if self.pts.is_prepared_base(name) {
            self.pts.share_base(name, ty)?
        } else {
            self.pts.add_base(name, ty)?
        };
        self.constraints.add(inequality);
        Ok(())
    }

    /// Requests tracking of `owner.field` once the edge is finished
    pub(crate) fn record_field(&mut self, owner: &CType, field: &str) {
        let key = CompositeField::of(owner, field);
        if self.pts.tracks_field(&key)
            || self
                .essential_fields
                .iter()
                .any(|(o, f)| CompositeField::of(o, f) == key)
        {
            return;
        }
        self.essential_fields.push((owner.clone(), field.to_string()));
    }

    /// Fresh unconstrained integer
    pub(crate) fn nondet(&self) -> Term {
        Term::int_var(format!("{}{}", NONDET_PREFIX, self.ctx.next_nondet()))
    }

    /// Location of a plain declared variable
    pub(crate) fn variable_location(&mut self, name: &str, ty: &CType) -> Result<Location> {
        if self.is_aliased_variable(name, ty) {
            self.ensure_base(name, ty)?;
            Ok(Location::Aliased(self.fm().base_address(name)))
        } else {
            Ok(Location::Unaliased(name.to_string()))
        }
    }

    /// Finishes the edge: tracks the essential fields, commits pending memory
    /// writes and freezes the state
    pub fn finish(mut self) -> Result<EdgeEncoding> {
        let requests = std::mem::take(&mut self.essential_fields);
        if !requests.is_empty() {
            let kept = self.pts.add_essential_fields(&requests)?;
            trace!(requested = requests.len(), kept, "essential fields");
        }
        self.commit_writes(None)?;
        Ok(EdgeEncoding {
            formula: self.constraints.into_term(),
            ssa: self.ssa.build(),
            pts: self.pts.build(),
            errors: self.errors,
        })
    }
}
