//! Resolver configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// What to do when the same table is traversed twice within one stage,
/// e.g. an explicit join to `products` alongside the implicit join through
/// `Product ID`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateJoinPolicy {
    /// Offer one bucket per traversal, with identical labels and column lists.
    /// This is what the editor has always shown.
    #[default]
    Preserve,
    /// Keep only the first bucket for a given label within a stage.
    Collapse,
}

/// Options for stage extraction and mapping resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// How repeated traversals of a table are offered
    pub duplicate_joins: DuplicateJoinPolicy,
    /// Whether columns reachable through foreign keys are offered as targets
    pub include_implicit_joins: bool,
    /// Maximum length of a card-on-card source chain
    pub max_source_depth: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverOptions {
    /// Create new options with defaults
    pub fn new() -> Self {
        Self {
            duplicate_joins: DuplicateJoinPolicy::Preserve,
            include_implicit_joins: true,
            max_source_depth: 16,
        }
    }

    /// Set the duplicate join policy
    pub fn with_duplicate_joins(mut self, policy: DuplicateJoinPolicy) -> Self {
        self.duplicate_joins = policy;
        self
    }

    /// Set whether implicit joins are offered
    pub fn with_implicit_joins(mut self, include: bool) -> Self {
        self.include_implicit_joins = include;
        self
    }

    /// Set the maximum source chain length
    pub fn with_max_source_depth(mut self, depth: usize) -> Self {
        self.max_source_depth = depth;
        self
    }

    /// Load options from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_options_builder() {
        let options = ResolverOptions::new()
            .with_duplicate_joins(DuplicateJoinPolicy::Collapse)
            .with_implicit_joins(false)
            .with_max_source_depth(3);

        assert_eq!(options.duplicate_joins, DuplicateJoinPolicy::Collapse);
        assert!(!options.include_implicit_joins);
        assert_eq!(options.max_source_depth, 3);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let options = ResolverOptions::from_json(r#"{"duplicate_joins": "collapse"}"#).unwrap();
        assert_eq!(options.duplicate_joins, DuplicateJoinPolicy::Collapse);
        assert!(options.include_implicit_joins);
        assert_eq!(options.max_source_depth, 16);

        assert_eq!(ResolverOptions::from_json("{}").unwrap(), ResolverOptions::new());
        assert!(ResolverOptions::from_json(r#"{"duplicate_joins": "merge"}"#).is_err());
    }
}
