//! Type layout service
//!
//! Sizes and member offsets for C types on a fixed machine model. Alignment
//! of every scalar equals its size; structs pad members to their alignment and
//! round their total size up to the largest member alignment; unions are as
//! large as their largest member.

use super::{CType, CompositeKind, CompositeType, Member, SimpleKind};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Scalar sizes in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineModel {
    /// `_Bool`
    pub bool_size: u64,
    /// `char` and its signed/unsigned variants
    pub char_size: u64,
    /// `short`
    pub short_size: u64,
    /// `int`
    pub int_size: u64,
    /// `long`
    pub long_size: u64,
    /// `long long`
    pub long_long_size: u64,
    /// `float`
    pub float_size: u64,
    /// `double`
    pub double_size: u64,
    /// `long double`
    pub long_double_size: u64,
    /// Data pointers
    pub pointer_size: u64,
}

impl MachineModel {
    /// 64-bit Linux
    pub const LP64: MachineModel = MachineModel {
        bool_size: 1,
        char_size: 1,
        short_size: 2,
        int_size: 4,
        long_size: 8,
        long_long_size: 8,
        float_size: 4,
        double_size: 8,
        long_double_size: 16,
        pointer_size: 8,
    };

    /// 32-bit Linux
    pub const ILP32: MachineModel = MachineModel {
        bool_size: 1,
        char_size: 1,
        short_size: 2,
        int_size: 4,
        long_size: 4,
        long_long_size: 8,
        float_size: 4,
        double_size: 8,
        long_double_size: 12,
        pointer_size: 4,
    };

    /// Size of an arithmetic type
    pub fn simple_size(&self, kind: SimpleKind) -> u64 {
        match kind {
            SimpleKind::Bool => self.bool_size,
            SimpleKind::Char | SimpleKind::SignedChar | SimpleKind::UnsignedChar => {
                self.char_size
            }
            SimpleKind::Short | SimpleKind::UnsignedShort => self.short_size,
            SimpleKind::Int | SimpleKind::UnsignedInt => self.int_size,
            SimpleKind::Long | SimpleKind::UnsignedLong => self.long_size,
            SimpleKind::LongLong | SimpleKind::UnsignedLongLong => self.long_long_size,
            SimpleKind::Float => self.float_size,
            SimpleKind::Double => self.double_size,
            SimpleKind::LongDouble => self.long_double_size,
        }
    }
}

impl Default for MachineModel {
    fn default() -> Self {
        MachineModel::LP64
    }
}

fn align_up(offset: u64, alignment: u64) -> Option<u64> {
    if alignment <= 1 {
        Some(offset)
    } else {
        offset.checked_next_multiple_of(alignment)
    }
}

fn too_large(ty: &CType) -> Error {
    Error::TypeError(format!("size of {} exceeds the address space", ty))
}

/// Read-only C type queries used by the encoder
///
/// Implementors only resolve composite tags; all layout queries are provided.
pub trait TypeService: Send + Sync + Debug {
    /// Machine model used for scalar sizes
    fn machine(&self) -> &MachineModel;

    /// Definition of a struct or union tag, `None` while incomplete
    fn resolve_composite(&self, kind: CompositeKind, name: &str) -> Option<Arc<CompositeType>>;

    /// Canonical form with elaborated references replaced by their definitions
    /// (at the top level only)
    fn simplify(&self, ty: &CType) -> CType {
        match ty.canonical() {
            CType::Elaborated { kind, name } => match self.resolve_composite(kind, &name) {
                Some(def) => CType::Composite(def),
                None => CType::Elaborated { kind, name },
            },
            other => other,
        }
    }

    /// Composite definition behind `ty`, if it is a complete struct or union
    fn composite_of(&self, ty: &CType) -> Option<Arc<CompositeType>> {
        match self.simplify(ty) {
            CType::Composite(def) => Some(def),
            _ => None,
        }
    }

    /// Returns true if `sizeof(ty)` is defined
    fn is_complete(&self, ty: &CType) -> bool {
        match self.simplify(ty) {
            CType::Void | CType::Function(_) | CType::Elaborated { .. } => false,
            CType::Array { element, .. } => self.is_complete(&element),
            _ => true,
        }
    }

    /// `sizeof(ty)` in bytes; arrays of unknown length have size 0
    fn size_of(&self, ty: &CType) -> Result<u64> {
        let machine = self.machine();
        match self.simplify(ty) {
            // GNU C: sizeof(void) == sizeof(function) == 1
            CType::Void | CType::Function(_) => Ok(1),
            CType::Simple(kind) => Ok(machine.simple_size(kind)),
            CType::Pointer(_) => Ok(machine.pointer_size),
            CType::Enum(_) => Ok(machine.int_size),
            CType::BitField { base, .. } => self.size_of(&base),
            CType::Array { element, length } => match length {
                Some(n) => n
                    .checked_mul(self.size_of(&element)?)
                    .ok_or_else(|| too_large(ty)),
                None => Ok(0),
            },
            CType::Composite(def) => {
                let layout = self.member_offsets(&def)?;
                let mut size = 0;
                for (member, offset) in &layout {
                    let end = offset
                        .checked_add(self.size_of(&member.ty)?)
                        .ok_or_else(|| too_large(ty))?;
                    size = size.max(end);
                }
                align_up(size, self.align_of(&CType::Composite(def))?)
                    .ok_or_else(|| too_large(ty))
            }
            CType::Elaborated { kind, name } => Err(Error::TypeError(format!(
                "sizeof applied to incomplete type {} {}",
                kind.keyword(),
                name
            ))),
            CType::Typedef { .. } | CType::Qualified { .. } => {
                unreachable!("canonical types carry no typedefs or qualifiers")
            }
        }
    }

    /// Alignment requirement in bytes
    fn align_of(&self, ty: &CType) -> Result<u64> {
        match self.simplify(ty) {
            CType::Array { element, .. } => self.align_of(&element),
            CType::Composite(def) => {
                let mut alignment = 1;
                for member in &def.members {
                    alignment = alignment.max(self.align_of(&member.ty)?);
                }
                Ok(alignment)
            }
            other => self.size_of(&other),
        }
    }

    /// Members of a composite with their byte offsets; union members are all at 0
    fn member_offsets(&self, def: &CompositeType) -> Result<Vec<(Member, u64)>> {
        let mut layout = Vec::with_capacity(def.members.len());
        let mut offset = 0;
        for member in &def.members {
            match def.kind {
                CompositeKind::Union => layout.push((member.clone(), 0)),
                CompositeKind::Struct => {
                    offset = align_up(offset, self.align_of(&member.ty)?)
                        .ok_or_else(|| too_large(&member.ty))?;
                    layout.push((member.clone(), offset));
                    offset = offset
                        .checked_add(self.size_of(&member.ty)?)
                        .ok_or_else(|| too_large(&member.ty))?;
                }
            }
        }
        Ok(layout)
    }

    /// Byte offset of member `field` inside `def`
    fn member_offset(&self, def: &CompositeType, field: &str) -> Result<u64> {
        self.member_offsets(def)?
            .into_iter()
            .find(|(member, _)| member.name == field)
            .map(|(_, offset)| offset)
            .ok_or_else(|| {
                Error::TypeError(format!(
                    "{} has no member named {}",
                    def.qualified_name(),
                    field
                ))
            })
    }
}

/// In-memory table of composite definitions
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    machine: MachineModel,
    composites: HashMap<(CompositeKind, String), Arc<CompositeType>>,
}

impl TypeTable {
    /// Empty table for the given machine
    pub fn new(machine: MachineModel) -> Self {
        Self {
            machine,
            composites: HashMap::new(),
        }
    }

    /// Empty LP64 table
    pub fn lp64() -> Self {
        Self::new(MachineModel::LP64)
    }

    /// Registers a composite definition and returns its type
    pub fn define(&mut self, def: CompositeType) -> CType {
        let def = Arc::new(def);
        self.composites
            .insert((def.kind, def.name.clone()), def.clone());
        CType::Composite(def)
    }
}

impl TypeService for TypeTable {
    fn machine(&self) -> &MachineModel {
        &self.machine
    }

    fn resolve_composite(&self, kind: CompositeKind, name: &str) -> Option<Arc<CompositeType>> {
        self.composites.get(&(kind, name.to_string())).cloned()
    }
}
