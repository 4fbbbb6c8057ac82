//! C expressions and control-flow edges consumed by the encoder
//!
//! The front end that produces these is out of scope; every expression
//! already carries its C type. Names of local variables are expected to be
//! unique per program (e.g. qualified as `main::x`).

use crate::types::CType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// C expression with its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CExpression {
    /// Integer or character literal
    IntLiteral {
        /// Value
        value: i128,
        /// Literal type
        ty: CType,
    },

    /// String literal; its type is `char[len + 1]`
    StringLiteral {
        /// Contents without the terminating zero
        value: String,
        /// Literal type
        ty: CType,
    },

    /// Variable or function designator
    Id {
        /// Declared name
        name: String,
        /// Declared type (a function type for function designators)
        ty: CType,
    },

    /// `array[index]`
    ArraySubscript {
        /// Array or pointer operand
        array: Box<CExpression>,
        /// Index
        index: Box<CExpression>,
        /// Element type
        ty: CType,
    },

    /// `owner.field` or `owner->field`
    FieldRef {
        /// Composite (or pointer to composite) operand
        owner: Box<CExpression>,
        /// Member name
        field: String,
        /// `->` access
        is_pointer_deref: bool,
        /// Member type
        ty: CType,
    },

    /// `*operand`
    PointerDeref {
        /// Pointer operand
        operand: Box<CExpression>,
        /// Pointed-to type
        ty: CType,
    },

    /// `&operand`
    AddressOf {
        /// Lvalue operand
        operand: Box<CExpression>,
        /// Pointer type
        ty: CType,
    },

    /// `(ty) operand`
    Cast {
        /// Converted operand
        operand: Box<CExpression>,
        /// Target type
        ty: CType,
    },

    /// Unary arithmetic or logical operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<CExpression>,
        /// Result type
        ty: CType,
    },

    /// Binary arithmetic, comparison, logical or bitwise operator
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<CExpression>,
        /// Right operand
        rhs: Box<CExpression>,
        /// Result type
        ty: CType,
    },

    /// `sizeof(type)`
    SizeofType {
        /// Measured type
        operand_type: CType,
        /// Result type (`unsigned long`)
        ty: CType,
    },

    /// Function call inside an expression
    FunctionCall {
        /// Called function
        function: String,
        /// Arguments
        args: Vec<CExpression>,
        /// Return type
        ty: CType,
    },
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation operator (-)
    Neg,
    /// Logical not operator (!)
    Not,
    /// Bitwise complement operator (~)
    BitNot,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    /// Addition operator (+)
    Add,
    /// Subtraction operator (-)
    Sub,
    /// Multiplication operator (*)
    Mul,
    /// Division operator (/)
    Div,
    /// Modulo operator (%)
    Mod,

    // Comparison
    /// Equality operator (==)
    Eq,
    /// Inequality operator (!=)
    NotEq,
    /// Less than operator (<)
    Lt,
    /// Greater than operator (>)
    Gt,
    /// Less than or equal operator (<=)
    LtEq,
    /// Greater than or equal operator (>=)
    GtEq,

    // Logical
    /// Logical AND operator (&&)
    And,
    /// Logical OR operator (||)
    Or,

    // Bitwise
    /// Bitwise and (&)
    BitAnd,
    /// Bitwise or (|)
    BitOr,
    /// Bitwise xor (^)
    BitXor,
    /// Left shift (<<)
    Shl,
    /// Right shift (>>)
    Shr,
}

impl BinaryOp {
    /// Returns true for operators whose result is a truth value
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::LtEq
                | BinaryOp::GtEq
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    /// Returns true for bit-level operators
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }
}

impl CExpression {
    /// Type of the expression
    pub fn ty(&self) -> &CType {
        match self {
            CExpression::IntLiteral { ty, .. }
            | CExpression::StringLiteral { ty, .. }
            | CExpression::Id { ty, .. }
            | CExpression::ArraySubscript { ty, .. }
            | CExpression::FieldRef { ty, .. }
            | CExpression::PointerDeref { ty, .. }
            | CExpression::AddressOf { ty, .. }
            | CExpression::Cast { ty, .. }
            | CExpression::Unary { ty, .. }
            | CExpression::Binary { ty, .. }
            | CExpression::SizeofType { ty, .. }
            | CExpression::FunctionCall { ty, .. } => ty,
        }
    }

    /// `int` literal
    pub fn int(value: i128) -> Self {
        CExpression::IntLiteral {
            value,
            ty: CType::int(),
        }
    }

    /// Literal of the given type
    pub fn literal(value: i128, ty: CType) -> Self {
        CExpression::IntLiteral { value, ty }
    }

    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        let ty = CType::array_of(CType::char(), value.len() as u64 + 1);
        CExpression::StringLiteral { value, ty }
    }

    /// Variable reference
    pub fn id(name: impl Into<String>, ty: CType) -> Self {
        CExpression::Id {
            name: name.into(),
            ty,
        }
    }

    /// `array[index]`; the element type is taken from the array or pointer type
    pub fn subscript(array: CExpression, index: CExpression) -> Self {
        let ty = array.ty().pointee().unwrap_or(CType::Void);
        CExpression::ArraySubscript {
            array: Box::new(array),
            index: Box::new(index),
            ty,
        }
    }

    /// `owner.field`
    pub fn field(owner: CExpression, field: impl Into<String>, ty: CType) -> Self {
        CExpression::FieldRef {
            owner: Box::new(owner),
            field: field.into(),
            is_pointer_deref: false,
            ty,
        }
    }

    /// `owner->field`
    pub fn arrow(owner: CExpression, field: impl Into<String>, ty: CType) -> Self {
        CExpression::FieldRef {
            owner: Box::new(owner),
            field: field.into(),
            is_pointer_deref: true,
            ty,
        }
    }

    /// `*operand`
    pub fn deref(operand: CExpression) -> Self {
        let ty = operand.ty().pointee().unwrap_or(CType::Void);
        CExpression::PointerDeref {
            operand: Box::new(operand),
            ty,
        }
    }

    /// `&operand`
    pub fn address_of(operand: CExpression) -> Self {
        let ty = CType::pointer_to(operand.ty().clone());
        CExpression::AddressOf {
            operand: Box::new(operand),
            ty,
        }
    }

    /// `(ty) operand`
    pub fn cast(operand: CExpression, ty: CType) -> Self {
        CExpression::Cast {
            operand: Box::new(operand),
            ty,
        }
    }

    /// Binary expression
    pub fn binary(op: BinaryOp, lhs: CExpression, rhs: CExpression, ty: CType) -> Self {
        CExpression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            ty,
        }
    }

    /// Unary expression
    pub fn unary(op: UnaryOp, operand: CExpression, ty: CType) -> Self {
        CExpression::Unary {
            op,
            operand: Box::new(operand),
            ty,
        }
    }

    /// `sizeof(ty)`
    pub fn sizeof(operand_type: CType) -> Self {
        CExpression::SizeofType {
            operand_type,
            ty: CType::size_type(),
        }
    }

    /// Call expression
    pub fn call(function: impl Into<String>, args: Vec<CExpression>, ty: CType) -> Self {
        CExpression::FunctionCall {
            function: function.into(),
            args,
            ty,
        }
    }

    /// Strips casts
    pub fn strip_casts(&self) -> &CExpression {
        match self {
            CExpression::Cast { operand, .. } => operand.strip_casts(),
            other => other,
        }
    }

    /// Name of a plain variable reference (looking through casts)
    pub fn variable_name(&self) -> Option<&str> {
        match self.strip_casts() {
            CExpression::Id { name, ty } if !ty.is_function() => Some(name),
            _ => None,
        }
    }

    /// Literal value, if constant
    pub fn as_literal(&self) -> Option<i128> {
        match self.strip_casts() {
            CExpression::IntLiteral { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Variable at the root of an lvalue (`s` in `s.a[2].f`)
    pub fn root_variable(&self) -> Option<&str> {
        match self {
            CExpression::Id { name, ty } if !ty.is_function() => Some(name),
            CExpression::FieldRef {
                owner,
                is_pointer_deref: false,
                ..
            } => owner.root_variable(),
            CExpression::ArraySubscript { array, .. } if array.ty().is_array() => {
                array.root_variable()
            }
            CExpression::Cast { operand, .. } => operand.root_variable(),
            _ => None,
        }
    }
}

impl fmt::Display for CExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CExpression::IntLiteral { value, .. } => write!(f, "{}", value),
            CExpression::StringLiteral { value, .. } => write!(f, "{:?}", value),
            CExpression::Id { name, .. } => write!(f, "{}", name),
            CExpression::ArraySubscript { array, index, .. } => write!(f, "{}[{}]", array, index),
            CExpression::FieldRef {
                owner,
                field,
                is_pointer_deref,
                ..
            } => {
                let op = if *is_pointer_deref { "->" } else { "." };
                write!(f, "{}{}{}", owner, op, field)
            }
            CExpression::PointerDeref { operand, .. } => write!(f, "*{}", operand),
            CExpression::AddressOf { operand, .. } => write!(f, "&{}", operand),
            CExpression::Cast { operand, ty } => write!(f, "({}){}", ty, operand),
            CExpression::Unary { op, operand, .. } => write!(f, "{}{}", op, operand),
            CExpression::Binary { op, lhs, rhs, .. } => write!(f, "({} {} {})", lhs, op, rhs),
            CExpression::SizeofType { operand_type, .. } => write!(f, "sizeof({})", operand_type),
            CExpression::FunctionCall { function, args, .. } => {
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnaryOp::Neg => write!(f, "-"),
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::BitNot => write!(f, "~"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::NotEq => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::GtEq => write!(f, ">="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
            BinaryOp::BitAnd => write!(f, "&"),
            BinaryOp::BitOr => write!(f, "|"),
            BinaryOp::BitXor => write!(f, "^"),
            BinaryOp::Shl => write!(f, "<<"),
            BinaryOp::Shr => write!(f, ">>"),
        }
    }
}

/// Declaration initializer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// `= expr`
    Expression(CExpression),
    /// `= { ... }`
    List(Vec<Initializer>),
}

impl fmt::Display for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Initializer::Expression(e) => write!(f, "{}", e),
            Initializer::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Variable declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Variable name
    pub name: String,
    /// Declared type
    pub ty: CType,
    /// Initializer, if any
    pub initializer: Option<Initializer>,
    /// Global variables are implicitly zero-initialized
    pub is_global: bool,
}

/// What a control-flow edge does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// No effect
    Blank,
    /// Variable declaration
    Declaration(Declaration),
    /// `lhs = rhs;`
    Assignment {
        /// Assigned lvalue
        lhs: CExpression,
        /// Assigned value
        rhs: CExpression,
    },
    /// `[lhs =] function(args);`
    Call {
        /// Receiver of the result
        lhs: Option<CExpression>,
        /// Called function
        function: String,
        /// Arguments
        args: Vec<CExpression>,
        /// Declared return type
        return_type: CType,
    },
    /// `[assume(condition == truth)]`
    Assume {
        /// Branch condition
        condition: CExpression,
        /// Branch taken
        truth: bool,
    },
    /// `return [value];`
    Return {
        /// Returned value
        value: Option<CExpression>,
        /// Declared return type of the function
        return_type: CType,
    },
    /// Leaving the function; its local variables go out of scope
    FunctionExit {
        /// Local variables of the function
        locals: Vec<String>,
    },
}

/// Control-flow edge in the context of its function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfaEdge {
    /// Function the edge belongs to
    pub function: String,
    /// Edge effect
    pub kind: EdgeKind,
}

impl CfaEdge {
    /// Edge of `function`
    pub fn new(function: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            function: function.into(),
            kind,
        }
    }

    /// `lhs = rhs;`
    pub fn assign(function: impl Into<String>, lhs: CExpression, rhs: CExpression) -> Self {
        Self::new(function, EdgeKind::Assignment { lhs, rhs })
    }

    /// `ty name [= initializer];`
    pub fn declare(
        function: impl Into<String>,
        name: impl Into<String>,
        ty: CType,
        initializer: Option<Initializer>,
    ) -> Self {
        Self::new(
            function,
            EdgeKind::Declaration(Declaration {
                name: name.into(),
                ty,
                initializer,
                is_global: false,
            }),
        )
    }

    /// `lhs = function(args);`
    pub fn call(
        function: impl Into<String>,
        lhs: Option<CExpression>,
        callee: impl Into<String>,
        args: Vec<CExpression>,
        return_type: CType,
    ) -> Self {
        Self::new(
            function,
            EdgeKind::Call {
                lhs,
                function: callee.into(),
                args,
                return_type,
            },
        )
    }
}

impl fmt::Display for CfaEdge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            EdgeKind::Blank => write!(f, ";"),
            EdgeKind::Declaration(decl) => {
                if decl.is_global {
                    write!(f, "static ")?;
                }
                write!(f, "{} {}", decl.ty, decl.name)?;
                if let Some(init) = &decl.initializer {
                    write!(f, " = {}", init)?;
                }
                write!(f, ";")
            }
            EdgeKind::Assignment { lhs, rhs } => write!(f, "{} = {};", lhs, rhs),
            EdgeKind::Call {
                lhs,
                function,
                args,
                ..
            } => {
                if let Some(lhs) = lhs {
                    write!(f, "{} = ", lhs)?;
                }
                write!(f, "{}(", function)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ");")
            }
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    write!(f, "[{}]", condition)
                } else {
                    write!(f, "[!{}]", condition)
                }
            }
            EdgeKind::Return { value, .. } => match value {
                Some(v) => write!(f, "return {};", v),
                None => write!(f, "return;"),
            },
            EdgeKind::FunctionExit { .. } => write!(f, "exit {}", self.function),
        }
    }
}
