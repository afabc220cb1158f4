//! Dotted property paths over the record graph.
//!
//! A path is a sequence of steps, each naming a field, a reverse relation or
//! a schema alias on the current record kind, e.g. `trip.route.id` or
//! `stopTimes.stop.id`.

use convert_case::{Case, Casing};
use std::fmt;
use std::str::FromStr;

use crate::error::{GraphError, Result};

/// Represents a parsed path expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    /// The raw path string
    pub raw: String,
    /// Field or relation names, normalised to snake case
    pub steps: Vec<String>,
}

impl PropertyPath {
    /// Parse a dotted path expression.
    ///
    /// # Arguments
    ///
    /// * `path` - Dotted expression; camel-case steps are accepted
    ///
    /// # Returns
    ///
    /// The parsed path, or `InvalidPath` for empty expressions or empty steps
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(GraphError::InvalidPath {
                path: path.to_string(),
                reason: "empty expression".to_string(),
            });
        }

        let mut steps = Vec::new();
        for step in trimmed.split('.') {
            let step = step.trim();
            if step.is_empty() {
                return Err(GraphError::InvalidPath {
                    path: path.to_string(),
                    reason: "empty step".to_string(),
                });
            }
            if !step.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(GraphError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("illegal character in step '{}'", step),
                });
            }
            steps.push(step.to_case(Case::Snake));
        }

        Ok(Self {
            raw: path.to_string(),
            steps,
        })
    }

    /// Path made of the given steps.
    pub fn from_steps<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<String> = steps.into_iter().map(Into::into).collect();
        Self {
            raw: steps.join("."),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromStr for PropertyPath {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted_path() {
        let path = PropertyPath::parse("trip.route.id").unwrap();
        assert_eq!(path.steps, vec!["trip", "route", "id"]);
        assert_eq!(path.to_string(), "trip.route.id");
    }

    #[test]
    fn test_camel_case_steps_are_normalised() {
        let path = PropertyPath::parse("stopTimes.stop.id").unwrap();
        assert_eq!(path.steps, vec!["stop_times", "stop", "id"]);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(PropertyPath::parse("").is_err());
        assert!(PropertyPath::parse("trip..id").is_err());
        assert!(PropertyPath::parse("trip.").is_err());
        assert!(PropertyPath::parse("trip[0]").is_err());
    }

    #[test]
    fn test_from_steps() {
        let path = PropertyPath::from_steps(["route", "id"]);
        assert_eq!(path.raw, "route.id");
        assert_eq!(path.len(), 2);
    }
}
