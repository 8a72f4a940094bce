//! Handle grammar check shared by lookups and ingestion.

use regex::Regex;

/// Letters, digits and underscore, one to fifteen characters.
pub const DEFAULT_HANDLE_PATTERN: &str = "^[A-Za-z0-9_]{1,15}$";

/// Validates candidate handles against the configured grammar.
///
/// The pattern must match the whole candidate; it is anchored at both ends
/// regardless of how it was written.
#[derive(Debug, Clone)]
pub struct HandleValidator {
    grammar: Regex,
}

impl HandleValidator {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let grammar = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self { grammar })
    }

    pub fn is_valid(&self, candidate: &str) -> bool {
        !candidate.is_empty() && self.grammar.is_match(candidate)
    }
}
