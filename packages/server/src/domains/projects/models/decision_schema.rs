//! Decision schema: the set of choices reviewers pick from.
//!
//! The schema is a versioned JSON document on the project row. `version`
//! only ever increases; events recorded under an older version stay
//! renderable because events carry the raw `decision_id` string, not an
//! index into the current schema.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CHOICE_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,64}$").unwrap();
}

pub const MAX_LABEL_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionChoice {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSchema {
    pub version: i32,
    pub choices: Vec<DecisionChoice>,
    #[serde(default)]
    pub allow_notes: bool,
}

impl DecisionSchema {
    /// Structural validation: choice ids match the id grammar and are
    /// unique, labels fit the length cap.
    pub fn validate(&self) -> Result<(), String> {
        if self.version < 1 {
            return Err("schema version must be >= 1".into());
        }
        if self.choices.is_empty() {
            return Err("schema must define at least one choice".into());
        }
        let mut seen = std::collections::HashSet::new();
        for choice in &self.choices {
            if !CHOICE_ID_RE.is_match(&choice.id) {
                return Err(format!("invalid choice id: {:?}", choice.id));
            }
            if !seen.insert(choice.id.as_str()) {
                return Err(format!("duplicate choice id: {:?}", choice.id));
            }
            if choice.label.is_empty() || choice.label.chars().count() > MAX_LABEL_LEN {
                return Err(format!("invalid label for choice {:?}", choice.id));
            }
        }
        Ok(())
    }

    pub fn has_choice(&self, decision_id: &str) -> bool {
        self.choices.iter().any(|c| c.id == decision_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(ids: &[&str]) -> DecisionSchema {
        DecisionSchema {
            version: 1,
            choices: ids
                .iter()
                .map(|id| DecisionChoice {
                    id: id.to_string(),
                    label: format!("Label {}", id),
                    hotkey: None,
                })
                .collect(),
            allow_notes: true,
        }
    }

    #[test]
    fn accepts_valid_schema() {
        assert!(schema(&["keep", "drop", "flag.hard-case_2"]).validate().is_ok());
    }

    #[test]
    fn rejects_bad_choice_ids() {
        assert!(schema(&["has space"]).validate().is_err());
        assert!(schema(&[""]).validate().is_err());
        assert!(schema(&["é"]).validate().is_err());
        let long = "x".repeat(65);
        assert!(schema(&[long.as_str()]).validate().is_err());
    }

    #[test]
    fn rejects_duplicate_choice_ids() {
        assert!(schema(&["keep", "keep"]).validate().is_err());
    }

    #[test]
    fn rejects_oversized_label() {
        let mut s = schema(&["keep"]);
        s.choices[0].label = "x".repeat(65);
        assert!(s.validate().is_err());
    }

    #[test]
    fn has_choice_matches_exactly() {
        let s = schema(&["keep", "drop"]);
        assert!(s.has_choice("keep"));
        assert!(!s.has_choice("Keep"));
        assert!(!s.has_choice("unknown"));
    }
}
