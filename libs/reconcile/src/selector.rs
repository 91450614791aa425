//! Label selectors used to discover the instances of a workload.
//!
//! A [`LabelSelector`] is the serialized form stored on the workload. It is
//! parsed into a [`Selector`] before use; a selector that fails to parse
//! stops the pass before any instance is listed.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Labels;

/// Maximum length of a label key's name segment.
const MAX_KEY_NAME_LEN: usize = 63;

/// Selector parse errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector is empty and would match every instance")]
    Empty,

    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("unknown selector operator {operator:?} for key {key:?}")]
    UnknownOperator { key: String, operator: String },

    #[error("operator {operator} on key {key:?} requires at least one value")]
    MissingValues { key: String, operator: Operator },

    #[error("operator {operator} on key {key:?} must not carry values")]
    UnexpectedValues { key: String, operator: Operator },
}

/// One `matchExpressions` entry as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Stored selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: Labels,
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Selector matching exactly the given labels.
    pub fn from_labels(labels: Labels) -> Self {
        Self {
            match_labels: labels,
            match_expressions: Vec::new(),
        }
    }

    /// Validate and convert into a matcher.
    pub fn parse(&self) -> Result<Selector, SelectorError> {
        if self.match_labels.is_empty() && self.match_expressions.is_empty() {
            return Err(SelectorError::Empty);
        }

        let mut requirements = Vec::with_capacity(
            self.match_labels.len() + self.match_expressions.len(),
        );

        for (key, value) in &self.match_labels {
            validate_key(key)?;
            requirements.push(Requirement {
                key: key.clone(),
                operator: Operator::In,
                values: BTreeSet::from([value.clone()]),
            });
        }

        for expr in &self.match_expressions {
            validate_key(&expr.key)?;
            let operator = Operator::parse(&expr.operator).ok_or_else(|| {
                SelectorError::UnknownOperator {
                    key: expr.key.clone(),
                    operator: expr.operator.clone(),
                }
            })?;

            match operator {
                Operator::In | Operator::NotIn if expr.values.is_empty() => {
                    return Err(SelectorError::MissingValues {
                        key: expr.key.clone(),
                        operator,
                    });
                }
                Operator::Exists | Operator::DoesNotExist if !expr.values.is_empty() => {
                    return Err(SelectorError::UnexpectedValues {
                        key: expr.key.clone(),
                        operator,
                    });
                }
                _ => {}
            }

            requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values: expr.values.iter().cloned().collect(),
            });
        }

        Ok(Selector { requirements })
    }
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let name = match key.split_once('/') {
        Some((prefix, name)) if !prefix.is_empty() => name,
        Some(_) => return Err(SelectorError::InvalidKey(key.to_string())),
        None => key,
    };

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    let valid_edges = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());

    if name.is_empty() || name.len() > MAX_KEY_NAME_LEN || !valid_chars || !valid_edges {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Selector operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "In" => Some(Self::In),
            "NotIn" => Some(Self::NotIn),
            "Exists" => Some(Self::Exists),
            "DoesNotExist" => Some(Self::DoesNotExist),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Exists => "Exists",
            Self::DoesNotExist => "DoesNotExist",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// A validated selector. All requirements must hold for a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let values = r.values.iter().cloned().collect::<Vec<_>>().join(",");
                match r.operator {
                    Operator::In if r.values.len() == 1 => format!("{}={}", r.key, values),
                    Operator::In => format!("{} in ({})", r.key, values),
                    Operator::NotIn => format!("{} notin ({})", r.key, values),
                    Operator::Exists => r.key.clone(),
                    Operator::DoesNotExist => format!("!{}", r.key),
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
