//! SMT terms
//!
//! A small first-order term language over booleans, mathematical integers and
//! integer-indexed integer arrays. Construction goes through smart constructors
//! that fold constants and drop neutral elements, so trivially true constraints
//! stay `Term::Bool(true)` and can be recognized by callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Sort of a term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sort {
    /// Booleans
    Bool,
    /// Mathematical integers
    Int,
    /// Arrays from `Int` to `Int`
    Array,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::Int => write!(f, "Int"),
            Sort::Array => write!(f, "(Array Int Int)"),
        }
    }
}

/// SMT term
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Boolean constant
    Bool(bool),
    /// Integer constant
    Int(i128),
    /// Free or bound variable
    Var {
        /// Symbol name
        name: String,
        /// Its sort
        sort: Sort,
    },
    /// `(select array index)`
    Select {
        /// Array
        array: Box<Term>,
        /// Index
        index: Box<Term>,
    },
    /// `(store array index value)`
    Store {
        /// Array
        array: Box<Term>,
        /// Index
        index: Box<Term>,
        /// Stored value
        value: Box<Term>,
    },
    /// Equality
    Eq(Box<Term>, Box<Term>),
    /// Negation
    Not(Box<Term>),
    /// Conjunction
    And(Vec<Term>),
    /// Disjunction
    Or(Vec<Term>),
    /// Implication
    Implies(Box<Term>, Box<Term>),
    /// If-then-else
    Ite {
        /// Condition
        cond: Box<Term>,
        /// Value if true
        then: Box<Term>,
        /// Value if false
        otherwise: Box<Term>,
    },
    /// Addition
    Add(Box<Term>, Box<Term>),
    /// Subtraction
    Sub(Box<Term>, Box<Term>),
    /// Multiplication
    Mul(Box<Term>, Box<Term>),
    /// Integer division
    Div(Box<Term>, Box<Term>),
    /// Integer remainder
    Mod(Box<Term>, Box<Term>),
    /// Less than
    Lt(Box<Term>, Box<Term>),
    /// Less or equal
    Le(Box<Term>, Box<Term>),
    /// Universal quantification over one integer variable
    ForAll {
        /// Bound variable name
        var: String,
        /// Body
        body: Box<Term>,
    },
    /// Application of an uninterpreted `Int -> Int` function
    App {
        /// Function symbol
        func: String,
        /// Arguments
        args: Vec<Term>,
    },
}

impl Term {
    /// `true`
    pub fn tt() -> Term {
        Term::Bool(true)
    }

    /// `false`
    pub fn ff() -> Term {
        Term::Bool(false)
    }

    /// Integer literal
    pub fn int(value: impl Into<i128>) -> Term {
        Term::Int(value.into())
    }

    /// Integer variable
    pub fn int_var(name: impl Into<String>) -> Term {
        Term::Var {
            name: name.into(),
            sort: Sort::Int,
        }
    }

    /// Boolean variable
    pub fn bool_var(name: impl Into<String>) -> Term {
        Term::Var {
            name: name.into(),
            sort: Sort::Bool,
        }
    }

    /// Array variable
    pub fn array_var(name: impl Into<String>) -> Term {
        Term::Var {
            name: name.into(),
            sort: Sort::Array,
        }
    }

    /// Returns true for the literal `true`
    pub fn is_true(&self) -> bool {
        matches!(self, Term::Bool(true))
    }

    /// Returns true for the literal `false`
    pub fn is_false(&self) -> bool {
        matches!(self, Term::Bool(false))
    }

    /// Integer value of a literal
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Term::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Sort of the term
    pub fn sort(&self) -> Sort {
        match self {
            Term::Bool(_)
            | Term::Eq(..)
            | Term::Not(_)
            | Term::And(_)
            | Term::Or(_)
            | Term::Implies(..)
            | Term::Lt(..)
            | Term::Le(..)
            | Term::ForAll { .. } => Sort::Bool,
            Term::Int(_)
            | Term::Select { .. }
            | Term::Add(..)
            | Term::Sub(..)
            | Term::Mul(..)
            | Term::Div(..)
            | Term::Mod(..)
            | Term::App { .. } => Sort::Int,
            Term::Store { .. } => Sort::Array,
            Term::Var { sort, .. } => *sort,
            Term::Ite { then, .. } => then.sort(),
        }
    }

    /// `(select array index)`; reading the cell just written yields the written value
    pub fn select(array: Term, index: Term) -> Term {
        if let Term::Store {
            index: written,
            value,
            ..
        } = &array
        {
            if **written == index {
                return (**value).clone();
            }
        }
        Term::Select {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    /// `(store array index value)`
    pub fn store(array: Term, index: Term, value: Term) -> Term {
        Term::Store {
            array: Box::new(array),
            index: Box::new(index),
            value: Box::new(value),
        }
    }

    /// Equality, `true` for syntactically equal sides
    pub fn eq(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            _ if lhs == rhs => Term::tt(),
            (Term::Int(a), Term::Int(b)) => Term::Bool(a == b),
            (Term::Bool(a), Term::Bool(b)) => Term::Bool(a == b),
            _ => Term::Eq(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Negation
    pub fn not(term: Term) -> Term {
        match term {
            Term::Bool(b) => Term::Bool(!b),
            Term::Not(inner) => *inner,
            other => Term::Not(Box::new(other)),
        }
    }

    /// Conjunction; flattens nested conjunctions and drops `true`
    pub fn and(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut parts = Vec::new();
        for term in terms {
            match term {
                Term::Bool(true) => {}
                Term::Bool(false) => return Term::ff(),
                Term::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Term::tt(),
            1 => parts.remove(0),
            _ => Term::And(parts),
        }
    }

    /// Binary conjunction
    pub fn and2(lhs: Term, rhs: Term) -> Term {
        Term::and([lhs, rhs])
    }

    /// Disjunction; flattens nested disjunctions and drops `false`
    pub fn or(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut parts = Vec::new();
        for term in terms {
            match term {
                Term::Bool(false) => {}
                Term::Bool(true) => return Term::tt(),
                Term::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Term::ff(),
            1 => parts.remove(0),
            _ => Term::Or(parts),
        }
    }

    /// Binary disjunction
    pub fn or2(lhs: Term, rhs: Term) -> Term {
        Term::or([lhs, rhs])
    }

    /// Implication
    pub fn implies(premise: Term, conclusion: Term) -> Term {
        match (&premise, &conclusion) {
            (Term::Bool(true), _) => conclusion,
            (Term::Bool(false), _) | (_, Term::Bool(true)) => Term::tt(),
            (_, Term::Bool(false)) => Term::not(premise),
            _ => Term::Implies(Box::new(premise), Box::new(conclusion)),
        }
    }

    /// If-then-else
    pub fn ite(cond: Term, then: Term, otherwise: Term) -> Term {
        match cond {
            Term::Bool(true) => then,
            Term::Bool(false) => otherwise,
            _ if then == otherwise => then,
            cond => Term::Ite {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        }
    }

    /// Addition
    #[allow(clippy::should_implement_trait)]
    pub fn add(lhs: Term, rhs: Term) -> Term {
        if let Some(folded) = fold_ints(&lhs, &rhs, i128::checked_add) {
            return folded;
        }
        match (&lhs, &rhs) {
            (_, Term::Int(0)) => lhs,
            (Term::Int(0), _) => rhs,
            _ => Term::Add(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Subtraction
    #[allow(clippy::should_implement_trait)]
    pub fn sub(lhs: Term, rhs: Term) -> Term {
        if let Some(folded) = fold_ints(&lhs, &rhs, i128::checked_sub) {
            return folded;
        }
        match (&lhs, &rhs) {
            (_, Term::Int(0)) => lhs,
            _ => Term::Sub(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Multiplication
    #[allow(clippy::should_implement_trait)]
    pub fn mul(lhs: Term, rhs: Term) -> Term {
        if let Some(folded) = fold_ints(&lhs, &rhs, i128::checked_mul) {
            return folded;
        }
        match (&lhs, &rhs) {
            (_, Term::Int(1)) => lhs,
            (Term::Int(1), _) => rhs,
            (_, Term::Int(0)) | (Term::Int(0), _) => Term::Int(0),
            _ => Term::Mul(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Integer division (left unevaluated for a zero divisor or on overflow)
    #[allow(clippy::should_implement_trait)]
    pub fn div(lhs: Term, rhs: Term) -> Term {
        if let Some(folded) = fold_ints(&lhs, &rhs, i128::checked_div_euclid) {
            return folded;
        }
        match (&lhs, &rhs) {
            (_, Term::Int(1)) => lhs,
            _ => Term::Div(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Integer remainder (left unevaluated for a zero divisor or on overflow)
    pub fn modulo(lhs: Term, rhs: Term) -> Term {
        if let Some(folded) = fold_ints(&lhs, &rhs, i128::checked_rem_euclid) {
            return folded;
        }
        Term::Mod(Box::new(lhs), Box::new(rhs))
    }

    /// Less than
    pub fn lt(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (Term::Int(a), Term::Int(b)) => Term::Bool(a < b),
            _ => Term::Lt(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Less or equal
    pub fn le(lhs: Term, rhs: Term) -> Term {
        match (&lhs, &rhs) {
            (Term::Int(a), Term::Int(b)) => Term::Bool(a <= b),
            _ if lhs == rhs => Term::tt(),
            _ => Term::Le(Box::new(lhs), Box::new(rhs)),
        }
    }

    /// Greater than
    pub fn gt(lhs: Term, rhs: Term) -> Term {
        Term::lt(rhs, lhs)
    }

    /// Greater or equal
    pub fn ge(lhs: Term, rhs: Term) -> Term {
        Term::le(rhs, lhs)
    }

    /// Universal quantification over the integer variable `var`
    pub fn forall(var: impl Into<String>, body: Term) -> Term {
        if let Term::Bool(_) = body {
            return body;
        }
        Term::ForAll {
            var: var.into(),
            body: Box::new(body),
        }
    }

    /// Uninterpreted function application
    pub fn app(func: impl Into<String>, args: Vec<Term>) -> Term {
        Term::App {
            func: func.into(),
            args,
        }
    }

    /// Free variables with their sorts
    pub fn free_variables(&self) -> BTreeMap<String, Sort> {
        let mut out = BTreeMap::new();
        self.collect_variables(&mut Vec::new(), &mut out);
        out
    }

    fn collect_variables(&self, bound: &mut Vec<String>, out: &mut BTreeMap<String, Sort>) {
        match self {
            Term::Bool(_) | Term::Int(_) => {}
            Term::Var { name, sort } => {
                if !bound.contains(name) {
                    out.insert(name.clone(), *sort);
                }
            }
            Term::ForAll { var, body } => {
                bound.push(var.clone());
                body.collect_variables(bound, out);
                bound.pop();
            }
            other => {
                for child in other.children() {
                    child.collect_variables(bound, out);
                }
            }
        }
    }

    /// Uninterpreted function symbols with their arities
    pub fn functions(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        self.collect_functions(&mut out);
        out
    }

    fn collect_functions(&self, out: &mut BTreeMap<String, usize>) {
        if let Term::App { func, args } = self {
            out.insert(func.clone(), args.len());
        }
        for child in self.children() {
            child.collect_functions(out);
        }
    }

    /// Direct subterms
    pub fn children(&self) -> Vec<&Term> {
        match self {
            Term::Bool(_) | Term::Int(_) | Term::Var { .. } => vec![],
            Term::Select { array, index } => vec![&**array, &**index],
            Term::Store {
                array,
                index,
                value,
            } => vec![&**array, &**index, &**value],
            Term::Not(inner) => vec![&**inner],
            Term::ForAll { body, .. } => vec![&**body],
            Term::And(parts) | Term::Or(parts) => parts.iter().collect(),
            Term::App { args, .. } => args.iter().collect(),
            Term::Ite {
                cond,
                then,
                otherwise,
            } => vec![&**cond, &**then, &**otherwise],
            Term::Eq(a, b)
            | Term::Implies(a, b)
            | Term::Add(a, b)
            | Term::Sub(a, b)
            | Term::Mul(a, b)
            | Term::Div(a, b)
            | Term::Mod(a, b)
            | Term::Lt(a, b)
            | Term::Le(a, b) => vec![&**a, &**b],
        }
    }

    /// Number of `store` applications in the term
    pub fn count_stores(&self) -> usize {
        let own = usize::from(matches!(self, Term::Store { .. }));
        own + self.children().iter().map(|c| c.count_stores()).sum::<usize>()
    }

    /// Returns true if `pred` holds for this term or any subterm
    pub fn any(&self, pred: &dyn Fn(&Term) -> bool) -> bool {
        pred(self) || self.children().iter().any(|c| c.any(pred))
    }
}

/// Constant result of `op` on two integer literals; `None` when an operand is
/// symbolic or the result is not representable
fn fold_ints(lhs: &Term, rhs: &Term, op: fn(i128, i128) -> Option<i128>) -> Option<Term> {
    match (lhs, rhs) {
        (Term::Int(a), Term::Int(b)) => op(*a, *b).map(Term::Int),
        _ => None,
    }
}

/// SMT-LIB symbol, quoted with `|..|` when it is not a simple symbol
pub fn symbol(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c));
    if simple {
        name.to_string()
    } else {
        format!("|{}|", name)
    }
}

fn write_app(f: &mut fmt::Formatter, op: &str, args: &[&Term]) -> fmt::Result {
    write!(f, "({}", op)?;
    for arg in args {
        write!(f, " {}", arg)?;
    }
    write!(f, ")")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Term::Bool(b) => write!(f, "{}", b),
            Term::Int(v) if *v < 0 => write!(f, "(- {})", v.unsigned_abs()),
            Term::Int(v) => write!(f, "{}", v),
            Term::Var { name, .. } => write!(f, "{}", symbol(name)),
            Term::Select { array, index } => write_app(f, "select", &[&**array, &**index]),
            Term::Store {
                array,
                index,
                value,
            } => write_app(f, "store", &[&**array, &**index, &**value]),
            Term::Eq(a, b) => write_app(f, "=", &[&**a, &**b]),
            Term::Not(a) => write_app(f, "not", &[&**a]),
            Term::And(parts) => write_app(f, "and", &parts.iter().collect::<Vec<_>>()),
            Term::Or(parts) => write_app(f, "or", &parts.iter().collect::<Vec<_>>()),
            Term::Implies(a, b) => write_app(f, "=>", &[&**a, &**b]),
            Term::Ite {
                cond,
                then,
                otherwise,
            } => write_app(f, "ite", &[&**cond, &**then, &**otherwise]),
            Term::Add(a, b) => write_app(f, "+", &[&**a, &**b]),
            Term::Sub(a, b) => write_app(f, "-", &[&**a, &**b]),
            Term::Mul(a, b) => write_app(f, "*", &[&**a, &**b]),
            Term::Div(a, b) => write_app(f, "div", &[&**a, &**b]),
            Term::Mod(a, b) => write_app(f, "mod", &[&**a, &**b]),
            Term::Lt(a, b) => write_app(f, "<", &[&**a, &**b]),
            Term::Le(a, b) => write_app(f, "<=", &[&**a, &**b]),
            Term::ForAll { var, body } => {
                write!(f, "(forall (({} Int)) {})", symbol(var), body)
            }
            Term::App { func, args } => {
                write_app(f, &symbol(func), &args.iter().collect::<Vec<_>>())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_simplification() {
        let x = Term::bool_var("x");
        assert_eq!(Term::and([Term::tt(), x.clone()]), x);
        assert!(Term::and([x.clone(), Term::ff()]).is_false());
        assert!(Term::and(Vec::new()).is_true());
        assert!(Term::or([x.clone(), Term::tt()]).is_true());
        assert_eq!(Term::not(Term::not(x.clone())), x);
        assert!(Term::eq(x.clone(), x.clone()).is_true());
        assert!(Term::implies(Term::ff(), x).is_true());
    }

    #[test]
    fn test_arithmetic_folding() {
        let a = Term::int_var("a");
        assert_eq!(Term::add(Term::int(2), Term::int(3)), Term::int(5));
        assert_eq!(Term::add(a.clone(), Term::int(0)), a);
        assert_eq!(Term::mul(Term::int(4), Term::int(3)), Term::int(12));
        assert_eq!(Term::mul(a.clone(), Term::int(1)), a);
        assert_eq!(Term::div(Term::int(-7), Term::int(2)), Term::int(-4));
        assert!(Term::lt(Term::int(1), Term::int(2)).is_true());
        assert!(matches!(Term::div(a, Term::int(0)), Term::Div(..)));
    }

    #[test]
    fn test_overflowing_constants_stay_symbolic() {
        let max = Term::int(i128::MAX);
        let min = Term::int(i128::MIN);
        assert!(matches!(Term::add(max.clone(), Term::int(1)), Term::Add(..)));
        assert!(matches!(Term::sub(min.clone(), Term::int(1)), Term::Sub(..)));
        assert!(matches!(Term::mul(max.clone(), Term::int(2)), Term::Mul(..)));
        assert!(matches!(Term::div(min.clone(), Term::int(-1)), Term::Div(..)));
        assert!(matches!(Term::modulo(min, Term::int(-1)), Term::Mod(..)));
        assert!(matches!(Term::modulo(max.clone(), Term::int(0)), Term::Mod(..)));
        // Units still simplify without folding
        assert_eq!(Term::mul(max.clone(), Term::int(1)), max);
    }

    #[test]
    fn test_select_over_store() {
        let mem = Term::array_var("*int@1");
        let addr = Term::add(Term::int_var("__ADDRESS_OF_a"), Term::int(4));
        let written = Term::store(mem, addr.clone(), Term::int(5));
        assert_eq!(Term::select(written, addr), Term::int(5));
    }

    #[test]
    fn test_smtlib_rendering() {
        let mem = Term::array_var("*struct s@2");
        let term = Term::eq(
            Term::select(mem, Term::int_var("p@1")),
            Term::int(-3),
        );
        assert_eq!(term.to_string(), "(= (select |*struct s@2| p@1) (- 3))");
        assert_eq!(symbol("main::__alloc#1"), "|main::__alloc#1|");
        assert_eq!(symbol("*int@2"), "*int@2");
    }

    #[test]
    fn test_free_variables_skip_bound() {
        let body = Term::eq(
            Term::select(Term::array_var("m"), Term::int_var("i")),
            Term::int_var("v"),
        );
        let vars = Term::forall("i", body).free_variables();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("m"), Some(&Sort::Array));
        assert!(!vars.contains_key("i"));
    }
}
