//! String comparison core shared by the field matchers.
//!
//! Patterns are compiled once at matcher construction; regex failures
//! surface there, never per-request.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::MatcherError;

/// Comparison operator for string-valued fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StringOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    /// Regex full-text search.
    Matches,
    /// Inverted regex search.
    NotMatches,
}

/// Case sensitivity flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaseMode {
    #[default]
    Sensitive,
    Insensitive,
}

/// A string comparison compiled for repeated evaluation.
#[derive(Debug, Clone)]
pub struct StringComparer {
    operator: StringOperator,
    case: CaseMode,
    expected: String,
    /// Lowercased copy for insensitive comparisons.
    expected_folded: String,
    /// Present only for Matches/NotMatches.
    regex: Option<Arc<Regex>>,
}

impl StringComparer {
    pub fn compile(
        operator: StringOperator,
        case: CaseMode,
        expected: &str,
    ) -> Result<Self, MatcherError> {
        let regex = match operator {
            StringOperator::Matches | StringOperator::NotMatches => {
                let pattern = match case {
                    CaseMode::Sensitive => expected.to_string(),
                    CaseMode::Insensitive => format!("(?i){expected}"),
                };
                let compiled = Regex::new(&pattern)
                    .map_err(|e| MatcherError::InvalidPattern(e.to_string()))?;
                Some(Arc::new(compiled))
            }
            _ => None,
        };
        Ok(Self {
            operator,
            case,
            expected: expected.to_string(),
            expected_folded: expected.to_lowercase(),
            regex,
        })
    }

    pub fn operator(&self) -> StringOperator {
        self.operator
    }

    pub fn case(&self) -> CaseMode {
        self.case
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Evaluate against a present field value.
    pub fn matches(&self, value: &str) -> bool {
        match self.operator {
            StringOperator::Matches => self
                .regex
                .as_ref()
                .map(|r| r.is_match(value))
                .unwrap_or(false),
            StringOperator::NotMatches => self
                .regex
                .as_ref()
                .map(|r| !r.is_match(value))
                .unwrap_or(false),
            _ => {
                let (expected, value) = match self.case {
                    CaseMode::Sensitive => (self.expected.as_str(), value.to_string()),
                    CaseMode::Insensitive => (self.expected_folded.as_str(), value.to_lowercase()),
                };
                match self.operator {
                    StringOperator::Equals => value == expected,
                    StringOperator::Contains => value.contains(expected),
                    StringOperator::StartsWith => value.starts_with(expected),
                    StringOperator::EndsWith => value.ends_with(expected),
                    StringOperator::Matches | StringOperator::NotMatches => unreachable!(),
                }
            }
        }
    }
}
