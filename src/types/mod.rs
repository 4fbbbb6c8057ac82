//! # C Type Descriptions
//!
//! The encoder consumes C types as read-only descriptions. This module provides
//! the closed sum type [`CType`] together with the queries the encoder needs:
//! simplification (typedefs and qualifiers removed), canonical spelling, and
//! shape predicates. Layout questions (`sizeof`, member offsets) go through the
//! [`TypeService`] trait, implemented by [`TypeTable`] for an LP64 machine.
//!
//! Composite types may be referenced by name through [`CType::Elaborated`], which
//! is how recursive structures are written:
//!
//! ```
//! use heapalias::types::{CType, CompositeKind, CompositeType, Member, TypeService, TypeTable};
//!
//! let mut table = TypeTable::lp64();
//! let node = table.define(CompositeType::new(
//!     CompositeKind::Struct,
//!     "node",
//!     vec![
//!         Member::new("value", CType::int()),
//!         Member::new("next", CType::pointer_to(CType::elaborated(CompositeKind::Struct, "node"))),
//!     ],
//! ));
//! assert_eq!(table.size_of(&node).unwrap(), 16);
//! assert_eq!(node.to_string(), "struct node");
//! ```

pub mod layout;

pub use layout::{MachineModel, TypeService, TypeTable};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Arithmetic C types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SimpleKind {
    /// `_Bool`
    Bool,
    /// `char`
    Char,
    /// `signed char`
    SignedChar,
    /// `unsigned char`
    UnsignedChar,
    /// `short`
    Short,
    /// `unsigned short`
    UnsignedShort,
    /// `int`
    Int,
    /// `unsigned int`
    UnsignedInt,
    /// `long`
    Long,
    /// `unsigned long`
    UnsignedLong,
    /// `long long`
    LongLong,
    /// `unsigned long long`
    UnsignedLongLong,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `long double`
    LongDouble,
}

impl SimpleKind {
    /// C spelling of the type
    pub fn name(&self) -> &'static str {
        match self {
            SimpleKind::Bool => "_Bool",
            SimpleKind::Char => "char",
            SimpleKind::SignedChar => "signed char",
            SimpleKind::UnsignedChar => "unsigned char",
            SimpleKind::Short => "short",
            SimpleKind::UnsignedShort => "unsigned short",
            SimpleKind::Int => "int",
            SimpleKind::UnsignedInt => "unsigned int",
            SimpleKind::Long => "long",
            SimpleKind::UnsignedLong => "unsigned long",
            SimpleKind::LongLong => "long long",
            SimpleKind::UnsignedLongLong => "unsigned long long",
            SimpleKind::Float => "float",
            SimpleKind::Double => "double",
            SimpleKind::LongDouble => "long double",
        }
    }

    /// Returns true for floating point kinds
    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            SimpleKind::Float | SimpleKind::Double | SimpleKind::LongDouble
        )
    }
}

/// Struct or union
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompositeKind {
    /// `struct`
    Struct,
    /// `union`
    Union,
}

impl CompositeKind {
    /// C keyword
    pub fn keyword(&self) -> &'static str {
        match self {
            CompositeKind::Struct => "struct",
            CompositeKind::Union => "union",
        }
    }
}

/// A named member of a composite type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    /// Member name
    pub name: String,
    /// Declared member type
    pub ty: CType,
}

impl Member {
    /// Creates a member
    pub fn new(name: impl Into<String>, ty: CType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Complete definition of a struct or union
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeType {
    /// Struct or union
    pub kind: CompositeKind,
    /// Tag name (synthesized for anonymous composites)
    pub name: String,
    /// Members in declaration order
    pub members: Vec<Member>,
}

impl CompositeType {
    /// Creates a composite definition
    pub fn new(kind: CompositeKind, name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            kind,
            name: name.into(),
            members,
        }
    }

    /// Looks up a member by name
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// `struct name` / `union name`
    pub fn qualified_name(&self) -> String {
        format!("{} {}", self.kind.keyword(), self.name)
    }

    /// Returns true for unions
    pub fn is_union(&self) -> bool {
        self.kind == CompositeKind::Union
    }
}

/// Function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionType {
    /// Return type
    pub return_type: CType,
    /// Parameter types
    pub parameters: Vec<CType>,
    /// Takes `...`
    pub variadic: bool,
}

/// `const` / `volatile`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Qualifiers {
    /// `const`
    pub is_const: bool,
    /// `volatile`
    pub is_volatile: bool,
}

/// C type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CType {
    /// `void`
    Void,
    /// Arithmetic type
    Simple(SimpleKind),
    /// Pointer to the inner type
    Pointer(Box<CType>),
    /// Array; `length` is `None` for flexible and variable-length arrays
    Array {
        /// Element type
        element: Box<CType>,
        /// Static length, if known
        length: Option<u64>,
    },
    /// Struct or union with its definition
    Composite(Arc<CompositeType>),
    /// Struct or union referenced by tag only; incomplete until resolved
    Elaborated {
        /// Struct or union
        kind: CompositeKind,
        /// Tag name
        name: String,
    },
    /// Enumeration (stored like `int`)
    Enum(String),
    /// Function type
    Function(Arc<FunctionType>),
    /// Typedef name for the target type
    Typedef {
        /// Typedef name
        name: String,
        /// Aliased type
        target: Box<CType>,
    },
    /// Bit-field member type
    BitField {
        /// Underlying integer type
        base: Box<CType>,
        /// Width in bits
        width: u8,
    },
    /// Qualified type
    Qualified {
        /// Qualifiers
        qualifiers: Qualifiers,
        /// Unqualified type
        ty: Box<CType>,
    },
}

impl CType {
    /// `int`
    pub fn int() -> Self {
        CType::Simple(SimpleKind::Int)
    }

    /// `char`
    pub fn char() -> Self {
        CType::Simple(SimpleKind::Char)
    }

    /// `long`
    pub fn long() -> Self {
        CType::Simple(SimpleKind::Long)
    }

    /// `unsigned long`, the type of `sizeof`
    pub fn size_type() -> Self {
        CType::Simple(SimpleKind::UnsignedLong)
    }

    /// Pointer to `target`
    pub fn pointer_to(target: CType) -> Self {
        CType::Pointer(Box::new(target))
    }

    /// `void *`
    pub fn void_pointer() -> Self {
        CType::pointer_to(CType::Void)
    }

    /// Array of `length` elements
    pub fn array_of(element: CType, length: u64) -> Self {
        CType::Array {
            element: Box::new(element),
            length: Some(length),
        }
    }

    /// Array of unknown length
    pub fn unsized_array_of(element: CType) -> Self {
        CType::Array {
            element: Box::new(element),
            length: None,
        }
    }

    /// Composite type from its definition
    pub fn composite(definition: CompositeType) -> Self {
        CType::Composite(Arc::new(definition))
    }

    /// Tag-only reference to a composite type
    pub fn elaborated(kind: CompositeKind, name: impl Into<String>) -> Self {
        CType::Elaborated {
            kind,
            name: name.into(),
        }
    }

    /// Function type
    pub fn function(return_type: CType, parameters: Vec<CType>) -> Self {
        CType::Function(Arc::new(FunctionType {
            return_type,
            parameters,
            variadic: false,
        }))
    }

    /// Removes typedefs and qualifiers at every level except inside composite
    /// members; composite definitions are kept as declared.
    pub fn canonical(&self) -> CType {
        match self {
            CType::Typedef { target, .. } => target.canonical(),
            CType::Qualified { ty, .. } => ty.canonical(),
            CType::Pointer(inner) => CType::Pointer(Box::new(inner.canonical())),
            CType::Array { element, length } => CType::Array {
                element: Box::new(element.canonical()),
                length: *length,
            },
            CType::BitField { base, width } => CType::BitField {
                base: Box::new(base.canonical()),
                width: *width,
            },
            other => other.clone(),
        }
    }

    /// Qualifiers at the top level (looking through typedefs)
    pub fn qualifiers(&self) -> Qualifiers {
        match self {
            CType::Qualified { qualifiers, ty } => {
                let inner = ty.qualifiers();
                Qualifiers {
                    is_const: qualifiers.is_const || inner.is_const,
                    is_volatile: qualifiers.is_volatile || inner.is_volatile,
                }
            }
            CType::Typedef { target, .. } => target.qualifiers(),
            _ => Qualifiers::default(),
        }
    }

    /// Returns true for `void`
    pub fn is_void(&self) -> bool {
        matches!(self.canonical(), CType::Void)
    }

    /// Returns true for pointers
    pub fn is_pointer(&self) -> bool {
        matches!(self.canonical(), CType::Pointer(_))
    }

    /// Returns true for arrays
    pub fn is_array(&self) -> bool {
        matches!(self.canonical(), CType::Array { .. })
    }

    /// Returns true for structs and unions, complete or not
    pub fn is_composite(&self) -> bool {
        matches!(
            self.canonical(),
            CType::Composite(_) | CType::Elaborated { .. }
        )
    }

    /// Returns true for function types
    pub fn is_function(&self) -> bool {
        matches!(self.canonical(), CType::Function(_))
    }

    /// Returns true for types stored in a single memory cell: arithmetic types,
    /// pointers, enums and bit-fields
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.canonical(),
            CType::Simple(_) | CType::Pointer(_) | CType::Enum(_) | CType::BitField { .. }
        )
    }

    /// Returns true for `_Bool`
    pub fn is_bool(&self) -> bool {
        match self.canonical() {
            CType::Simple(SimpleKind::Bool) => true,
            CType::BitField { base, .. } => base.is_bool(),
            _ => false,
        }
    }

    /// Pointed-to type of a pointer, element type of an array
    pub fn pointee(&self) -> Option<CType> {
        match self.canonical() {
            CType::Pointer(inner) => Some(*inner),
            CType::Array { element, .. } => Some(*element),
            _ => None,
        }
    }

    /// Returns true for pointer types whose target is a concrete type, i.e.
    /// types that reveal what an untyped allocation holds
    pub fn is_revealing_pointer(&self) -> bool {
        match self.canonical() {
            CType::Pointer(inner) => !inner.is_void(),
            _ => false,
        }
    }

    /// Static array length
    pub fn array_length(&self) -> Option<u64> {
        match self.canonical() {
            CType::Array { length, .. } => length,
            _ => None,
        }
    }

    /// Canonical name of the type as used for memory arrays and target keys.
    /// Enums are stored as `int` and bit-fields as their underlying type.
    pub fn access_name(&self) -> String {
        match self.canonical() {
            CType::Enum(_) => SimpleKind::Int.name().to_string(),
            CType::BitField { base, .. } => base.access_name(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Simple(kind) => write!(f, "{}", kind.name()),
            CType::Pointer(inner) => write!(f, "{}*", inner),
            CType::Array { element, length } => match length {
                Some(n) => write!(f, "{}[{}]", element, n),
                None => write!(f, "{}[]", element),
            },
            CType::Composite(def) => write!(f, "{}", def.qualified_name()),
            CType::Elaborated { kind, name } => write!(f, "{} {}", kind.keyword(), name),
            CType::Enum(name) => write!(f, "enum {}", name),
            CType::Function(func) => {
                write!(f, "{}(", func.return_type)?;
                for (i, param) in func.parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                if func.variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ")")
            }
            CType::Typedef { name, .. } => write!(f, "{}", name),
            CType::BitField { base, width } => write!(f, "{}:{}", base, width),
            CType::Qualified { qualifiers, ty } => {
                if qualifiers.is_const {
                    write!(f, "const ")?;
                }
                if qualifiers.is_volatile {
                    write!(f, "volatile ")?;
                }
                write!(f, "{}", ty)
            }
        }
    }
}
