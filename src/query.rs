use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_SEPARATOR: &str = "[-. ]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    #[default]
    #[serde(alias = "&&")]
    And,
    #[serde(alias = "||")]
    Or,
}

impl BoolOp {
    pub fn token(&self) -> &'static str {
        match self {
            BoolOp::And => "&&",
            BoolOp::Or => "||",
        }
    }
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for BoolOp {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "&&" | "and" => Ok(BoolOp::And),
            "||" | "or" => Ok(BoolOp::Or),
            _ => Err(SyncError::InvalidOperator(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitMode {
    #[default]
    Tokens,
    WholeValue,
}

#[derive(Debug, Clone)]
pub struct QueryFormatter {
    separator: Regex,
    operator: BoolOp,
    mode: SplitMode,
}

impl QueryFormatter {
    pub fn standard() -> Result<Self, SyncError> {
        Self::new(DEFAULT_SEPARATOR, BoolOp::And, SplitMode::Tokens)
    }

    pub fn new(separator: &str, operator: BoolOp, mode: SplitMode) -> Result<Self, SyncError> {
        let separator = Regex::new(separator)
            .map_err(|err| SyncError::InvalidSeparator(format!("{separator}: {err}")))?;
        Ok(Self {
            separator,
            operator,
            mode,
        })
    }

    pub fn operator(&self) -> BoolOp {
        self.operator
    }

    pub fn format(&self, value: &str, field: &str) -> String {
        let query = match self.mode {
            SplitMode::Tokens => self.format_tokens(value, field),
            SplitMode::WholeValue => format!("({})", clause(&escape(value), field)),
        };
        tracing::debug!(%query, "formatted query");
        query.to_lowercase()
    }

    pub fn combine(&self, left: &str, right: &str) -> String {
        format!("({left} {} {right})", self.operator.token())
    }

    fn format_tokens(&self, value: &str, field: &str) -> String {
        let pieces = self.separator.split(value).collect::<Vec<_>>();
        if pieces.len() < 2 {
            return format!("({})", clause(value, field));
        }
        let op = self.operator.token();
        let mut clauses = pieces.iter().map(|piece| clause(piece, field));
        let first = clauses.next().unwrap_or_default();
        let second = clauses.next().unwrap_or_default();
        let mut query = format!("({first} {op} {second})");
        for piece in clauses {
            query = format!("({query} {op} {piece})");
        }
        query
    }
}

pub fn format_query(
    value: &str,
    separator: &str,
    field: &str,
    operator: BoolOp,
) -> Result<String, SyncError> {
    Ok(QueryFormatter::new(separator, operator, SplitMode::Tokens)?.format(value, field))
}

fn clause(term: &str, field: &str) -> String {
    format!("\"{term}\"[{field}]")
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_tokens_nest_left_to_right() {
        let query = format_query("a-b-c", "-", "f", BoolOp::And).unwrap();
        assert_eq!(query, "((\"a\"[f] && \"b\"[f]) && \"c\"[f])");
    }

    #[test]
    fn single_token_is_not_composed() {
        let query = format_query("abc", "-", "f", BoolOp::And).unwrap();
        assert_eq!(query, "(\"abc\"[f])");
    }

    #[test]
    fn two_tokens_and_lowercase() {
        let formatter = QueryFormatter::standard().unwrap();
        assert_eq!(
            formatter.format("ZOZOW1T.A", "rand_subject_id"),
            "(\"zozow1t\"[rand_subject_id] && \"a\"[rand_subject_id])"
        );
    }

    #[test]
    fn or_operator() {
        let query = format_query("x y", " ", "tags", BoolOp::Or).unwrap();
        assert_eq!(query, "(\"x\"[tags] || \"y\"[tags])");
    }

    #[test]
    fn default_split_decomposes_hyphenated_ids() {
        let formatter = QueryFormatter::standard().unwrap();
        let query = formatter.format("69-001", "visit_id");
        assert_eq!(query, "(\"69\"[visit_id] && \"001\"[visit_id])");
    }

    #[test]
    fn whole_value_mode_keeps_separator_and_escapes_quotes() {
        let formatter =
            QueryFormatter::new(DEFAULT_SEPARATOR, BoolOp::And, SplitMode::WholeValue).unwrap();
        assert_eq!(formatter.format("69-001", "visit_id"), "(\"69-001\"[visit_id])");
        assert_eq!(formatter.format("a\"b", "f"), "(\"a\\\"b\"[f])");
    }

    #[test]
    fn combine_queries() {
        let formatter = QueryFormatter::standard().unwrap();
        let tags = formatter.format("prediabetes", "tags");
        let node_type = formatter.format("visit", "node_type");
        assert_eq!(
            formatter.combine(&tags, &node_type),
            "((\"prediabetes\"[tags]) && (\"visit\"[node_type]))"
        );
    }

    #[test]
    fn standard_formatter_ands_split_tokens() {
        let formatter = QueryFormatter::standard().unwrap();
        assert_eq!(formatter.operator(), BoolOp::And);
        assert_eq!(formatter.format("a.b c", "f"), "((\"a\"[f] && \"b\"[f]) && \"c\"[f])");
    }

    #[test]
    fn invalid_separator() {
        assert!(QueryFormatter::new("[", BoolOp::And, SplitMode::Tokens).is_err());
    }
}
