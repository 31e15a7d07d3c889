//! Field-path lookup expressions over JSON provider responses.
//!
//! An expression is a dot-separated list of object keys, each optionally
//! followed by one or more `[index]` selectors, for example
//! `Reservations[0].Instances[0].PublicIpAddress`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while parsing or evaluating a lookup expression.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LookupError {
    /// Raised when the expression itself is malformed.
    #[error("invalid lookup expression '{expression}': {message}")]
    Syntax {
        /// Expression as written.
        expression: String,
        /// Description of the problem.
        message: String,
    },
    /// Raised when the document has no value at the path.
    #[error("no value at '{expression}'")]
    NoMatch {
        /// Expression that was evaluated.
        expression: String,
    },
    /// Raised when the value is present but is not a scalar.
    #[error("value at '{expression}' is not a string or number")]
    NotScalar {
        /// Expression that was evaluated.
        expression: String,
    },
    /// Raised when the value is an empty string.
    #[error("value at '{expression}' is empty")]
    Empty {
        /// Expression that was evaluated.
        expression: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed lookup expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LookupPath {
    expression: String,
    segments: Vec<Segment>,
}

impl LookupPath {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Syntax`] for empty keys, unbalanced brackets, or
    /// non-numeric indices.
    pub fn parse(expression: &str) -> Result<Self, LookupError> {
        let syntax = |message: &str| LookupError::Syntax {
            expression: expression.to_owned(),
            message: message.to_owned(),
        };

        let trimmed = expression.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(syntax("expression is empty"));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            let (key, mut rest) = part.find('[').map_or((part, ""), |pos| part.split_at(pos));
            if key.is_empty() {
                return Err(syntax("empty key"));
            }
            segments.push(Segment::Key(key.to_owned()));

            while !rest.is_empty() {
                let Some(inner) = rest.strip_prefix('[') else {
                    return Err(syntax("unexpected text after index"));
                };
                let Some(close) = inner.find(']') else {
                    return Err(syntax("unclosed '['"));
                };
                let (digits, tail) = inner.split_at(close);
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| syntax("index must be a non-negative integer"))?;
                segments.push(Segment::Index(index));
                rest = tail.strip_prefix(']').unwrap_or(tail);
            }
        }

        Ok(Self {
            expression: trimmed.to_owned(),
            segments,
        })
    }

    /// Returns the expression as written (without a leading dot).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Resolves the path and returns the raw JSON value.
    #[must_use]
    pub fn resolve<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }

    /// Extracts a non-empty scalar identifier from `document`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NoMatch`] when nothing is found (including a
    /// JSON `null`), [`LookupError::NotScalar`] for objects, arrays and
    /// booleans, and [`LookupError::Empty`] for blank strings.
    pub fn extract(&self, document: &Value) -> Result<String, LookupError> {
        let value = self
            .resolve(document)
            .filter(|value| !value.is_null())
            .ok_or_else(|| LookupError::NoMatch {
                expression: self.expression.clone(),
            })?;

        let text = match value {
            Value::String(text) => text.trim().to_owned(),
            Value::Number(number) => number.to_string(),
            _ => {
                return Err(LookupError::NotScalar {
                    expression: self.expression.clone(),
                });
            }
        };

        if text.is_empty() {
            return Err(LookupError::Empty {
                expression: self.expression.clone(),
            });
        }
        Ok(text)
    }
}

impl FromStr for LookupPath {
    type Err = LookupError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for LookupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn instances() -> Value {
        json!({
            "Reservations": [{
                "Instances": [{
                    "InstanceId": "i-0abc",
                    "PublicIpAddress": "203.0.113.10",
                    "State": {"Code": 16, "Name": "running"},
                    "Tags": []
                }]
            }]
        })
    }

    #[rstest]
    #[case("Reservations[0].Instances[0].InstanceId", "i-0abc")]
    #[case(".Reservations[0].Instances[0].State.Name", "running")]
    #[case("Reservations[0].Instances[0].State.Code", "16")]
    fn extract_walks_keys_and_indices(#[case] expression: &str, #[case] expected: &str) {
        let path = LookupPath::parse(expression).expect("expression should parse");
        assert_eq!(path.extract(&instances()).expect("value"), expected);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("Vpc..VpcId")]
    #[case("Items[")]
    #[case("Items[x]")]
    #[case("Items[0]tail")]
    #[case("[0]")]
    fn parse_rejects_malformed_expressions(#[case] expression: &str) {
        let err = LookupPath::parse(expression).expect_err("expression should be rejected");
        assert!(matches!(err, LookupError::Syntax { .. }), "got {err:?}");
    }

    #[test]
    fn extract_reports_missing_values() {
        let path = LookupPath::parse("Reservations[1].Instances[0].InstanceId").expect("parse");
        assert_eq!(
            path.extract(&instances()),
            Err(LookupError::NoMatch {
                expression: String::from("Reservations[1].Instances[0].InstanceId")
            })
        );
    }

    #[rstest]
    #[case(json!({"Vpc": {"VpcId": ""}}), "Vpc.VpcId")]
    #[case(json!({"Vpc": {"VpcId": "   "}}), "Vpc.VpcId")]
    fn extract_rejects_blank_identifiers(#[case] document: Value, #[case] expression: &str) {
        let path = LookupPath::parse(expression).expect("parse");
        assert!(matches!(
            path.extract(&document),
            Err(LookupError::Empty { .. })
        ));
    }

    #[rstest]
    #[case(json!({"Vpc": {"VpcId": null}}), true)]
    #[case(json!({"Vpc": {"VpcId": {"nested": 1}}}), false)]
    #[case(json!({"Vpc": {"VpcId": true}}), false)]
    fn extract_rejects_non_scalars(#[case] document: Value, #[case] is_null: bool) {
        let path = LookupPath::parse("Vpc.VpcId").expect("parse");
        let err = path.extract(&document).expect_err("extraction should fail");
        if is_null {
            assert!(matches!(err, LookupError::NoMatch { .. }));
        } else {
            assert!(matches!(err, LookupError::NotScalar { .. }));
        }
    }
}
