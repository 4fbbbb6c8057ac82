//! Results of evaluating C expressions

use crate::pointer_target::FIELD_SEPARATOR;
use crate::smt::Term;
use std::fmt;

/// Where an lvalue lives
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Cell of a typed memory array at the given address
    Aliased(Term),
    /// Plain SSA variable
    Unaliased(String),
}

impl Location {
    /// Returns true for memory cells
    pub fn is_aliased(&self) -> bool {
        matches!(self, Location::Aliased(_))
    }

    /// Address of an aliased location
    pub fn address(&self) -> Option<&Term> {
        match self {
            Location::Aliased(address) => Some(address),
            Location::Unaliased(_) => None,
        }
    }

    /// Location of `member` found `offset` bytes into this one; unaliased
    /// members are separate variables named `var$member`
    pub(crate) fn member(&self, offset: u64, member: &str) -> Location {
        match self {
            Location::Aliased(address) => {
                Location::Aliased(Term::add(address.clone(), Term::int(i128::from(offset))))
            }
            Location::Unaliased(name) => {
                Location::Unaliased(format!("{}{}{}", name, FIELD_SEPARATOR, member))
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Aliased(address) => write!(f, "*{}", address),
            Location::Unaliased(name) => write!(f, "{}", name),
        }
    }
}

impl From<Location> for Expression {
    fn from(location: Location) -> Self {
        match location {
            Location::Aliased(address) => Expression::AliasedLocation(address),
            Location::Unaliased(name) => Expression::UnaliasedLocation(name),
        }
    }
}

/// Evaluated C expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Computed value
    Value(Term),
    /// Memory cell at an address
    AliasedLocation(Term),
    /// Plain variable
    UnaliasedLocation(String),
    /// Unconstrained value
    Nondet,
}

impl Expression {
    /// Location of an lvalue result
    pub fn as_location(&self) -> Option<Location> {
        match self {
            Expression::AliasedLocation(address) => Some(Location::Aliased(address.clone())),
            Expression::UnaliasedLocation(name) => Some(Location::Unaliased(name.clone())),
            Expression::Value(_) | Expression::Nondet => None,
        }
    }

    /// Returns true for values that can be broadcast into every cell of an
    /// aggregate
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Expression::Value(_) | Expression::Nondet)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Value(term) => write!(f, "{}", term),
            Expression::AliasedLocation(address) => write!(f, "*{}", address),
            Expression::UnaliasedLocation(name) => write!(f, "{}", name),
            Expression::Nondet => write!(f, "nondet"),
        }
    }
}
