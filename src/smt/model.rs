//! Ground evaluation of terms
//!
//! A [`Model`] assigns values to free variables and uninterpreted functions and
//! evaluates terms under that assignment. Unassigned symbols take default values
//! (0, `false`, the all-zero array). Quantifiers are checked over a bounded
//! integer domain, so a `true` result for a quantified term is only meaningful
//! when every relevant index lies in that domain.

use super::term::{Sort, Term};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

/// Ground value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i128),
    /// Array with a default value and explicit entries
    Array {
        /// Value of every index not in `entries`
        default: i128,
        /// Explicitly written cells
        entries: BTreeMap<i128, i128>,
    },
}

impl Value {
    /// Array holding `default` everywhere
    pub fn constant_array(default: i128) -> Value {
        Value::Array {
            default,
            entries: BTreeMap::new(),
        }
    }

    fn default_for(sort: Sort) -> Value {
        match sort {
            Sort::Bool => Value::Bool(false),
            Sort::Int => Value::Int(0),
            Sort::Array => Value::constant_array(0),
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(sort_error("Bool", other)),
        }
    }

    fn as_int(&self) -> Result<i128> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(sort_error("Int", other)),
        }
    }

    /// Extensional equality; arrays are equal when they agree on every index
    pub fn equals(&self, other: &Value) -> Result<bool> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (
                Value::Array {
                    default: d1,
                    entries: e1,
                },
                Value::Array {
                    default: d2,
                    entries: e2,
                },
            ) => {
                if d1 != d2 {
                    return Ok(false);
                }
                for index in e1.keys().chain(e2.keys()) {
                    if self.read(*index)? != other.read(*index)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (a, _) => Err(sort_error("matching", a)),
        }
    }

    fn read(&self, index: i128) -> Result<i128> {
        match self {
            Value::Array { default, entries } => Ok(*entries.get(&index).unwrap_or(default)),
            other => Err(sort_error("Array", other)),
        }
    }
}

fn sort_error(expected: &str, got: &Value) -> Error {
    Error::TypeError(format!("expected a {} value, got {:?}", expected, got))
}

/// Assignment of values to symbols
#[derive(Debug, Clone)]
pub struct Model {
    values: HashMap<String, Value>,
    functions: HashMap<String, HashMap<Vec<i128>, i128>>,
    domain: RangeInclusive<i128>,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            functions: HashMap::new(),
            domain: -64..=256,
        }
    }
}

impl Model {
    /// Empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the domain over which quantifiers are checked
    pub fn with_quantifier_domain(mut self, domain: RangeInclusive<i128>) -> Self {
        self.domain = domain;
        self
    }

    /// Assigns an integer variable
    pub fn set_int(&mut self, name: impl Into<String>, value: i128) -> &mut Self {
        self.values.insert(name.into(), Value::Int(value));
        self
    }

    /// Assigns a boolean variable
    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) -> &mut Self {
        self.values.insert(name.into(), Value::Bool(value));
        self
    }

    /// Assigns an array variable
    pub fn set_array(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Defines one point of an uninterpreted function (others map to 0)
    pub fn set_function_value(
        &mut self,
        func: impl Into<String>,
        args: Vec<i128>,
        value: i128,
    ) -> &mut Self {
        self.functions
            .entry(func.into())
            .or_default()
            .insert(args, value);
        self
    }

    /// Current value of a variable, if assigned
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Evaluates a term
    pub fn eval(&self, term: &Term) -> Result<Value> {
        self.eval_in(term, &mut Vec::new())
    }

    /// Evaluates a boolean term
    pub fn eval_bool(&self, term: &Term) -> Result<bool> {
        self.eval(term)?.as_bool()
    }

    /// Evaluates an integer term
    pub fn eval_int(&self, term: &Term) -> Result<i128> {
        self.eval(term)?.as_int()
    }

    fn eval_in(&self, term: &Term, bound: &mut Vec<(String, i128)>) -> Result<Value> {
        Ok(match term {
            Term::Bool(b) => Value::Bool(*b),
            Term::Int(v) => Value::Int(*v),
            Term::Var { name, sort } => {
                if let Some((_, v)) = bound.iter().rev().find(|(n, _)| n == name) {
                    Value::Int(*v)
                } else {
                    self.values
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| Value::default_for(*sort))
                }
            }
            Term::Select { array, index } => {
                let array = self.eval_in(array, bound)?;
                let index = self.eval_in(index, bound)?.as_int()?;
                Value::Int(array.read(index)?)
            }
            Term::Store {
                array,
                index,
                value,
            } => {
                let index = self.eval_in(index, bound)?.as_int()?;
                let value = self.eval_in(value, bound)?.as_int()?;
                match self.eval_in(array, bound)? {
                    Value::Array {
                        default,
                        mut entries,
                    } => {
                        entries.insert(index, value);
                        Value::Array { default, entries }
                    }
                    other => return Err(sort_error("Array", &other)),
                }
            }
            Term::Eq(a, b) => {
                let (a, b) = (self.eval_in(a, bound)?, self.eval_in(b, bound)?);
                Value::Bool(a.equals(&b)?)
            }
            Term::Not(a) => Value::Bool(!self.eval_in(a, bound)?.as_bool()?),
            Term::And(parts) => {
                for part in parts {
                    if !self.eval_in(part, bound)?.as_bool()? {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Term::Or(parts) => {
                for part in parts {
                    if self.eval_in(part, bound)?.as_bool()? {
                        return Ok(Value::Bool(true));
                    }
                }
                Value::Bool(false)
            }
            Term::Implies(a, b) => Value::Bool(
                !self.eval_in(a, bound)?.as_bool()? || self.eval_in(b, bound)?.as_bool()?,
            ),
            Term::Ite {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_in(cond, bound)?.as_bool()? {
                    self.eval_in(then, bound)?
                } else {
                    self.eval_in(otherwise, bound)?
                }
            }
            Term::Add(a, b) => self.arith(a, b, bound, i128::checked_add)?,
            Term::Sub(a, b) => self.arith(a, b, bound, i128::checked_sub)?,
            Term::Mul(a, b) => self.arith(a, b, bound, i128::checked_mul)?,
            // Division by zero is total: `x / 0 = 0` and `x mod 0 = x`
            Term::Div(a, b) => self.arith(a, b, bound, |a, b| match b {
                0 => Some(0),
                _ => a.checked_div_euclid(b),
            })?,
            Term::Mod(a, b) => self.arith(a, b, bound, |a, b| match b {
                0 => Some(a),
                _ => a.checked_rem_euclid(b),
            })?,
            Term::Lt(a, b) => Value::Bool(self.int(a, bound)? < self.int(b, bound)?),
            Term::Le(a, b) => Value::Bool(self.int(a, bound)? <= self.int(b, bound)?),
            Term::ForAll { var, body } => {
                for i in self.domain.clone() {
                    bound.push((var.clone(), i));
                    let holds = self.eval_in(body, bound).and_then(|v| v.as_bool());
                    bound.pop();
                    if !holds? {
                        return Ok(Value::Bool(false));
                    }
                }
                Value::Bool(true)
            }
            Term::App { func, args } => {
                let mut point = Vec::with_capacity(args.len());
                for arg in args {
                    point.push(self.int(arg, bound)?);
                }
                let value = self
                    .functions
                    .get(func)
                    .and_then(|table| table.get(&point))
                    .copied()
                    .unwrap_or(0);
                Value::Int(value)
            }
        })
    }

    fn int(&self, term: &Term, bound: &mut Vec<(String, i128)>) -> Result<i128> {
        self.eval_in(term, bound)?.as_int()
    }

    fn arith(
        &self,
        a: &Term,
        b: &Term,
        bound: &mut Vec<(String, i128)>,
        op: fn(i128, i128) -> Option<i128>,
    ) -> Result<Value> {
        let (a, b) = (self.int(a, bound)?, self.int(b, bound)?);
        op(a, b)
            .map(Value::Int)
            .ok_or_else(|| Error::TypeError(format!("integer overflow evaluating {} and {}", a, b)))
    }
}
