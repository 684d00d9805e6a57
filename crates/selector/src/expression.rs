//! Selector expressions: `key OP values`.
//!
//! Accepted textual forms (operators are case-insensitive):
//! - `metadata.name IN (a, b)` / `metadata.name NOTIN (a, b)`
//! - `metadata.labels.env EXISTS` / `metadata.labels.env DOESNOTEXIST`
//! - `metadata.name MATCHES (orders-.*)`
//! - `key=value`, `key==value`, `key!=value`
//! - `key` (exists) and `!key` (does not exist)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::SelectorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    In,
    NotIn,
    Equals,
    NotEquals,
    Exists,
    DoesNotExist,
    Matches,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::In => "IN",
            Operator::NotIn => "NOTIN",
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOTEQUALS",
            Operator::Exists => "EXISTS",
            Operator::DoesNotExist => "DOESNOTEXIST",
            Operator::Matches => "MATCHES",
        }
    }

    /// Number of values the operator requires; `None` means one or more.
    fn arity(self) -> Option<usize> {
        match self {
            Operator::In | Operator::NotIn => None,
            Operator::Equals | Operator::NotEquals | Operator::Matches => Some(1),
            Operator::Exists | Operator::DoesNotExist => Some(0),
        }
    }
}

impl FromStr for Operator {
    type Err = SelectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(Operator::In),
            "NOTIN" => Ok(Operator::NotIn),
            "EQUALS" => Ok(Operator::Equals),
            "NOTEQUALS" => Ok(Operator::NotEquals),
            "EXISTS" => Ok(Operator::Exists),
            "DOESNOTEXIST" => Ok(Operator::DoesNotExist),
            "MATCHES" => Ok(Operator::Matches),
            other => Err(SelectorError::UnknownOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorExpression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: SmallVec<[String; 4]>,
}

impl SelectorExpression {
    pub fn new<I, S>(key: impl Into<String>, operator: Operator, values: I) -> Result<Self, SelectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expr = Self { key: key.into(), operator, values: values.into_iter().map(Into::into).collect() };
        expr.check()?;
        Ok(expr)
    }

    fn check(&self) -> Result<(), SelectorError> {
        if self.key.trim().is_empty() {
            return Err(SelectorError::Invalid { expr: self.to_string(), reason: "empty key".into() });
        }
        let ok = match self.operator.arity() {
            None => !self.values.is_empty(),
            Some(n) => self.values.len() == n,
        };
        if !ok {
            let reason = match self.operator.arity() {
                None => format!("{} requires at least one value", self.operator),
                Some(0) => format!("{} takes no values", self.operator),
                Some(n) => format!("{} requires exactly {} value", self.operator, n),
            };
            return Err(SelectorError::Invalid { expr: self.to_string(), reason });
        }
        Ok(())
    }

    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(SelectorError::Invalid { expr: input.to_string(), reason: "empty expression".into() });
        }
        if let Some((k, v)) = s.split_once("!=").filter(|(k, _)| is_bare_key(k)) {
            return Self::new(k.trim(), Operator::NotEquals, [v.trim()]);
        }
        if let Some((k, v)) = s.split_once("==").or_else(|| s.split_once('=')).filter(|(k, _)| is_bare_key(k)) {
            return Self::new(k.trim(), Operator::Equals, [v.trim()]);
        }
        let mut parts = s.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let rest = parts.next().map(str::trim).unwrap_or_default();
        if rest.is_empty() {
            return match key.strip_prefix('!') {
                Some(k) => Self::new(k, Operator::DoesNotExist, Vec::<String>::new()),
                None => Self::new(key, Operator::Exists, Vec::<String>::new()),
            };
        }
        let (op, args) = match rest.split_once(|c: char| c.is_whitespace() || c == '(') {
            Some((op, _)) => (op, rest[op.len()..].trim()),
            None => (rest, ""),
        };
        let operator: Operator = op.parse()?;
        let values = parse_values(args, operator)
            .ok_or_else(|| SelectorError::Invalid { expr: input.to_string(), reason: "unbalanced parentheses".into() })?;
        Self::new(key, operator, values)
    }
}

fn is_bare_key(k: &str) -> bool {
    let k = k.trim();
    !k.is_empty() && !k.contains(char::is_whitespace)
}

/// `(a, b)` or bare `a`. A `MATCHES` pattern keeps its commas.
fn parse_values(args: &str, op: Operator) -> Option<Vec<String>> {
    if args.is_empty() { return Some(Vec::new()); }
    let inner = match args.strip_prefix('(') {
        Some(rest) => rest.strip_suffix(')')?.trim(),
        None => args,
    };
    if op == Operator::Matches { return Some(vec![inner.to_string()]); }
    Some(inner.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect())
}

impl FromStr for SelectorExpression {
    type Err = SelectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for SelectorExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.operator)?;
        if !self.values.is_empty() { write!(f, " ({})", self.values.join(", "))?; }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_set_and_presence_forms() {
        let e = SelectorExpression::parse("metadata.name in (a, b ,c)").unwrap();
        assert_eq!(e.operator, Operator::In);
        assert_eq!(e.values.as_slice(), ["a", "b", "c"]);
        let e = SelectorExpression::parse("metadata.labels.env NOTIN(prod)").unwrap();
        assert_eq!(e.operator, Operator::NotIn);
        assert_eq!(e.values.as_slice(), ["prod"]);
        assert_eq!(SelectorExpression::parse("metadata.labels.team").unwrap().operator, Operator::Exists);
        assert_eq!(SelectorExpression::parse("!metadata.labels.team").unwrap().operator, Operator::DoesNotExist);
    }

    #[test]
    fn parses_equality_shorthand() {
        let e = SelectorExpression::parse("metadata.labels.env=prod").unwrap();
        assert_eq!((e.key.as_str(), e.operator, e.values[0].as_str()), ("metadata.labels.env", Operator::Equals, "prod"));
        let e = SelectorExpression::parse("kind != KafkaTopic").unwrap();
        assert_eq!(e.operator, Operator::NotEquals);
        assert_eq!(e.values[0], "KafkaTopic");
    }

    #[test]
    fn matches_keeps_pattern_intact() {
        let e = SelectorExpression::parse("metadata.name MATCHES (orders-[a-z]{1,3})").unwrap();
        assert_eq!(e.values.as_slice(), ["orders-[a-z]{1,3}"]);
    }

    #[test]
    fn rejects_bad_arity_and_operators() {
        assert!(SelectorExpression::new("metadata.name", Operator::Equals, ["a", "b"]).is_err());
        assert!(SelectorExpression::new("metadata.name", Operator::In, Vec::<String>::new()).is_err());
        assert!(matches!(SelectorExpression::parse("metadata.name LIKE (x)"), Err(SelectorError::UnknownOperator(_))));
        assert!(SelectorExpression::parse("metadata.name IN (x").is_err());
    }
}
