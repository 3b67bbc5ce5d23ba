//! Filter descriptors and the predicate language evaluated by the change feed.
//!
//! A predicate has the form `column=value` (equality shorthand) or
//! `column=op.value`, where `op` is one of `eq`, `neq`, `lt`, `lte`, `gt`,
//! `gte` or `in`. Set membership is written `column=in.(a,b,c)`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::event::{ChangeEvent, EventKind, Record};

/// Comparison operators supported in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl PredicateOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(PredicateOp::Eq),
            "neq" => Some(PredicateOp::Neq),
            "lt" => Some(PredicateOp::Lt),
            "lte" => Some(PredicateOp::Lte),
            "gt" => Some(PredicateOp::Gt),
            "gte" => Some(PredicateOp::Gte),
            "in" => Some(PredicateOp::In),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PredicateOp::Eq => "eq",
            PredicateOp::Neq => "neq",
            PredicateOp::Lt => "lt",
            PredicateOp::Lte => "lte",
            PredicateOp::Gt => "gt",
            PredicateOp::Gte => "gte",
            PredicateOp::In => "in",
        }
    }
}

/// A single-column predicate evaluated against a changed row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Predicate {
    column: String,
    op: PredicateOp,
    /// Literal operands; exactly one unless `op` is `In`.
    values: Vec<String>,
}

impl Predicate {
    /// Parse a predicate string.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let (column, rest) = input
            .split_once('=')
            .ok_or_else(|| Error::predicate(input, "expected 'column=value'"))?;

        let column = column.trim();
        if column.is_empty() {
            return Err(Error::predicate(input, "missing column name"));
        }

        // A leading `op.` is only an operator when it names one; otherwise the
        // whole right-hand side is an equality literal (e.g. `price=1.5`).
        let (op, operand) = match rest.split_once('.') {
            Some((name, operand)) => match PredicateOp::from_name(name) {
                Some(op) => (op, operand),
                None => (PredicateOp::Eq, rest),
            },
            None => (PredicateOp::Eq, rest),
        };

        let values = if op == PredicateOp::In {
            Self::parse_list(input, operand)?
        } else {
            if operand.is_empty() {
                return Err(Error::predicate(input, "missing value"));
            }
            vec![operand.to_string()]
        };

        Ok(Self {
            column: column.to_string(),
            op,
            values,
        })
    }

    fn parse_list(input: &str, operand: &str) -> Result<Vec<String>, Error> {
        let inner = operand
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| Error::predicate(input, "expected 'in.(a,b,...)'"))?;

        let values: Vec<String> = inner
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() {
            return Err(Error::predicate(input, "empty 'in' list"));
        }
        Ok(values)
    }

    /// Create an equality predicate.
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: PredicateOp::Eq,
            values: vec![value.into()],
        }
    }

    /// The column this predicate reads.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The comparison operator.
    pub fn op(&self) -> PredicateOp {
        self.op
    }

    /// Evaluate the predicate against a row.
    ///
    /// A missing column never matches.
    pub fn matches(&self, row: &Record) -> bool {
        let Some(field) = row.get(&self.column) else {
            return false;
        };

        match self.op {
            PredicateOp::Eq => Self::equals(field, &self.values[0]),
            PredicateOp::Neq => !Self::equals(field, &self.values[0]),
            PredicateOp::Lt => Self::ordered(field, &self.values[0], Ordering::is_lt),
            PredicateOp::Lte => Self::ordered(field, &self.values[0], Ordering::is_le),
            PredicateOp::Gt => Self::ordered(field, &self.values[0], Ordering::is_gt),
            PredicateOp::Gte => Self::ordered(field, &self.values[0], Ordering::is_ge),
            PredicateOp::In => self.values.iter().any(|v| Self::equals(field, v)),
        }
    }

    fn equals(field: &Value, literal: &str) -> bool {
        Self::compare(field, literal) == Some(Ordering::Equal)
    }

    fn ordered(field: &Value, literal: &str, check: fn(Ordering) -> bool) -> bool {
        Self::compare(field, literal).map(check).unwrap_or(false)
    }

    /// Compare a JSON value with a textual literal.
    fn compare(field: &Value, literal: &str) -> Option<Ordering> {
        match field {
            Value::Number(n) => {
                if let (Some(lhs), Ok(rhs)) = (n.as_i64(), literal.parse::<i64>()) {
                    return Some(lhs.cmp(&rhs));
                }
                if let (Some(lhs), Ok(rhs)) = (n.as_u64(), literal.parse::<u64>()) {
                    return Some(lhs.cmp(&rhs));
                }
                let lhs = n.as_f64()?;
                let rhs: f64 = literal.parse().ok()?;
                lhs.partial_cmp(&rhs)
            }
            Value::String(s) => Some(s.as_str().cmp(literal)),
            Value::Bool(b) => literal.parse::<bool>().ok().map(|l| b.cmp(&l)),
            Value::Null => (literal == "null").then_some(Ordering::Equal),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            PredicateOp::In => write!(f, "{}=in.({})", self.column, self.values.join(",")),
            op => write!(f, "{}={}.{}", self.column, op.name(), self.values[0]),
        }
    }
}

impl FromStr for Predicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Predicate {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Predicate> for String {
    fn from(predicate: Predicate) -> Self {
        predicate.to_string()
    }
}

/// Scope of a channel binding: which changes of which collection it receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterDescriptor {
    /// Change kind to receive.
    pub event: EventKind,
    /// Namespace of the collection.
    pub schema: String,
    /// Collection name.
    pub table: String,
    /// Optional row predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
}

impl FilterDescriptor {
    /// Create a descriptor for every change on a collection.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: EventKind::Any,
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    /// Restrict to one event kind.
    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    /// Restrict to rows matching a predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    /// Check whether an event falls within this descriptor.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.schema == event.schema
            && self.table == event.table
            && self.event.matches(event.change_type)
            && self
                .filter
                .as_ref()
                .map_or(true, |p| p.matches(event.record()))
    }
}

impl fmt::Display for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}.{}", self.event, self.schema, self.table)?;
        if let Some(filter) = &self.filter {
            write!(f, " where {}", filter)?;
        }
        Ok(())
    }
}
