//! Metadata predicate queries
//!
//! A query is a comma-separated conjunction of `field:operator:value`
//! clauses, for example `age:>=:18,name:==:x`. Comparisons are on strings:
//! ordering operators compare lexicographically, `contains` is a substring
//! test. A record matches only if it carries every clause's field and
//! every comparison succeeds.
//!
//! Parsing is done up front, so a malformed clause rejects the whole query
//! before any record is inspected.

use simplekv_core::{KvError, KvResult, Record};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `contains`
    Contains,
}

impl Operator {
    /// Apply the operator to a stored value and the clause operand
    pub fn matches(&self, stored: &str, operand: &str) -> bool {
        match self {
            Operator::Gt => stored > operand,
            Operator::Ge => stored >= operand,
            Operator::Lt => stored < operand,
            Operator::Le => stored <= operand,
            Operator::Eq => stored == operand,
            Operator::Ne => stored != operand,
            Operator::Contains => stored.contains(operand),
        }
    }

    /// Textual form as written in queries
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Contains => "contains",
        }
    }
}

impl FromStr for Operator {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "contains" => Ok(Operator::Contains),
            other => Err(KvError::invalid_query(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `field:operator:value` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Metadata key to test
    pub field: String,
    /// Comparison
    pub operator: Operator,
    /// Right-hand operand
    pub value: String,
}

impl Clause {
    /// Whether `record` satisfies this clause
    pub fn matches(&self, record: &Record) -> bool {
        record
            .metadata_value(&self.field)
            .map(|stored| self.operator.matches(&stored, &self.value))
            .unwrap_or(false)
    }
}

impl FromStr for Clause {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(KvError::invalid_query(format!(
                "clause '{}' must have the form field:operator:value",
                s
            )));
        }
        if parts[0].is_empty() {
            return Err(KvError::invalid_query(format!(
                "clause '{}' has an empty field",
                s
            )));
        }
        Ok(Clause {
            field: parts[0].to_string(),
            operator: parts[1].parse()?,
            value: parts[2].to_string(),
        })
    }
}

/// Parsed conjunction of clauses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataQuery {
    clauses: Vec<Clause>,
}

impl MetadataQuery {
    /// Parse a comma-separated query
    pub fn parse(query: &str) -> KvResult<Self> {
        let clauses = query
            .split(',')
            .map(str::parse::<Clause>)
            .collect::<KvResult<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    /// The parsed clauses in query order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Whether `record` satisfies every clause
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }
}

impl FromStr for MetadataQuery {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetadataQuery::parse(s)
    }
}
