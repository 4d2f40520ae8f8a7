//! Member filter expressions.
//!
//! `,` separates OR'd clauses, `+` joins the predicates of a clause, and each
//! predicate is `field:value`, `field:-value` or `field:[a,b]`. Unknown fields
//! never match.

use crate::member::{Attributes, MemberStatus};
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("empty predicate in filter '{0}'")]
    EmptyPredicate(String),

    #[error("predicate '{0}' is missing a ':' separator")]
    MissingSeparator(String),

    #[error("predicate '{0}' has no value")]
    MissingValue(String),

    #[error("unbalanced brackets in filter '{0}'")]
    UnbalancedBrackets(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Status,
    Label,
    Tier,
    Email,
    Uuid,
    Subscribed,
    Unknown(String),
}

impl Field {
    fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "status" => Field::Status,
            "label" | "label.slug" | "labels" => Field::Label,
            "tier" | "tier.slug" | "tiers" | "product" | "product.slug" => Field::Tier,
            "email" => Field::Email,
            "uuid" => Field::Uuid,
            "subscribed" => Field::Subscribed,
            other => Field::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: Field,
    pub values: Vec<String>,
    pub negated: bool,
}

impl Predicate {
    fn parse(raw: &str, expr: &str) -> Result<Self, FilterError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FilterError::EmptyPredicate(expr.to_string()));
        }

        let (field, value) = raw
            .split_once(':')
            .ok_or_else(|| FilterError::MissingSeparator(raw.to_string()))?;

        let mut value = value.trim();
        let negated = value.starts_with('-');
        if negated {
            value = value[1..].trim_start();
        }

        let values: Vec<String> = if value.starts_with('[') && value.ends_with(']') {
            value[1..value.len() - 1]
                .split(',')
                .map(unquote)
                .filter(|v| !v.is_empty())
                .collect()
        } else {
            vec![unquote(value)]
        };

        if values.iter().all(|v| v.is_empty()) {
            return Err(FilterError::MissingValue(raw.to_string()));
        }

        Ok(Self {
            field: Field::parse(field.trim()),
            values,
            negated,
        })
    }

    fn matches<A: Attributes + ?Sized>(&self, member: &A) -> bool {
        let hit = match &self.field {
            Field::Status => self
                .values
                .iter()
                .any(|v| v.eq_ignore_ascii_case(member.status().as_str())),
            Field::Label => any_shared(&self.values, member.labels()),
            Field::Tier => any_shared(&self.values, member.tiers()),
            Field::Email => self.values.iter().any(|v| v.eq_ignore_ascii_case(member.email())),
            Field::Uuid => {
                let uuid = member.uuid().to_string();
                self.values.iter().any(|v| v.eq_ignore_ascii_case(&uuid))
            }
            Field::Subscribed => {
                let subscribed = if member.subscribed() { "true" } else { "false" };
                self.values.iter().any(|v| v.eq_ignore_ascii_case(subscribed))
            }
            Field::Unknown(name) => {
                tracing::debug!(field = %name, "Unknown filter field, predicate does not match");
                return false;
            }
        };

        hit != self.negated
    }

    /// Status class every member satisfying this predicate must belong to.
    fn implied_status(&self) -> Option<StatusClass> {
        if self.field != Field::Status {
            return None;
        }
        let only_free = self.values.iter().all(|v| v.eq_ignore_ascii_case("free"));
        let no_free = self.values.iter().all(|v| {
            v.eq_ignore_ascii_case(MemberStatus::Paid.as_str())
                || v.eq_ignore_ascii_case(MemberStatus::Comped.as_str())
        });

        match (self.negated, only_free, no_free) {
            (false, true, _) => Some(StatusClass::Free),
            (false, _, true) => Some(StatusClass::NonFree),
            (true, true, _) => Some(StatusClass::NonFree),
            _ => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = match &self.field {
            Field::Status => "status",
            Field::Label => "label",
            Field::Tier => "tier",
            Field::Email => "email",
            Field::Uuid => "uuid",
            Field::Subscribed => "subscribed",
            Field::Unknown(name) => name.as_str(),
        };
        let sign = if self.negated { "-" } else { "" };
        let values: Vec<String> = self.values.iter().map(|v| quote_if_needed(v)).collect();
        if values.len() == 1 {
            write!(f, "{}:{}{}", field, sign, values[0])
        } else {
            write!(f, "{}:{}[{}]", field, sign, values.join(","))
        }
    }
}

// Values holding separators must stay quoted to parse back the same way.
fn quote_if_needed(value: &str) -> String {
    let special = |c: char| matches!(c, ',' | '+' | '[' | ']' | '\'' | '"') || c.is_whitespace();
    if !value.contains(special) {
        value.to_string()
    } else if value.contains('\'') {
        format!("\"{}\"", value)
    } else {
        format!("'{}'", value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub predicates: Vec<Predicate>,
}

impl Clause {
    fn matches<A: Attributes + ?Sized>(&self, member: &A) -> bool {
        self.predicates.iter().all(|p| p.matches(member))
    }
}

/// Coarse status grouping used to tell free and paying audiences apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Free,
    NonFree,
}

/// A parsed filter expression. An empty filter matches every member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut clauses = Vec::new();
        for raw_clause in split_top_level(trimmed, ',')? {
            let predicates = split_top_level(raw_clause, '+')?
                .into_iter()
                .map(|raw| Predicate::parse(raw, trimmed))
                .collect::<Result<Vec<_>, _>>()?;
            clauses.push(Clause { predicates });
        }

        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_match_all(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches<A: Attributes + ?Sized>(&self, member: &A) -> bool {
        self.clauses.is_empty() || self.clauses.iter().any(|c| c.matches(member))
    }

    /// Returns the status class shared by every member this filter can match,
    /// when each clause pins it down.
    pub fn implied_status(&self) -> Option<StatusClass> {
        let mut implied = None;
        for clause in &self.clauses {
            let class = clause.predicates.iter().find_map(Predicate::implied_status)?;
            match implied {
                None => implied = Some(class),
                Some(existing) if existing != class => return None,
                Some(_) => {}
            }
        }
        implied
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|c| {
                c.predicates
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join("+")
            })
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Evaluates `expr` against `member`. Malformed expressions match nobody.
pub fn matches<A: Attributes + ?Sized>(member: &A, expr: &str) -> bool {
    match Filter::parse(expr) {
        Ok(filter) => filter.matches(member),
        Err(e) => {
            warn!(filter = %expr, error = %e, "Malformed filter expression treated as non-matching");
            false
        }
    }
}

fn any_shared(wanted: &[String], have: &[String]) -> bool {
    wanted
        .iter()
        .any(|w| have.iter().any(|h| h.eq_ignore_ascii_case(w)))
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let stripped = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')));
    stripped.unwrap_or(value).trim().to_string()
}

/// Splits on `sep` while ignoring separators inside `[...]` or quotes.
fn split_top_level(input: &str, sep: char) -> Result<Vec<&str>, FilterError> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth < 0 {
                    return Err(FilterError::UnbalancedBrackets(input.to_string()));
                }
            }
            (None, c) if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FilterError::UnbalancedBrackets(input.to_string()));
    }
    parts.push(&input[start..]);
    Ok(parts)
}
