//! Payload inspection: structural limits and pattern screening.
//!
//! # Responsibilities
//! - Bound the length of every list anywhere in a payload
//! - Bound nesting depth (fail closed on adversarial input)
//! - Render the canonical text the pattern rules run against
//!
//! # Design Decisions
//! - Traversal uses an explicit work stack, never recursion
//! - `serde_json::Value` is a tree, so there are no cycles to guard against;
//!   the depth cap is what bounds work on hostile input
//! - Depth is checked before serialization, so the recursive serializer only
//!   ever sees values within the cap

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::security::patterns::{PatternRule, PatternSet};

/// Why a payload failed inspection.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("array of {found} items exceeds the limit of {limit}")]
    TooManyItems { limit: usize, found: usize },

    #[error("nesting exceeds the maximum depth of {limit}")]
    TooDeep { limit: usize },

    #[error("matched rule {} ({})", .0.id, .0.category)]
    Pattern(&'static PatternRule),

    #[error("failed to render payload: {0}")]
    Render(#[from] serde_json::Error),
}

/// Structural ceilings applied to every part of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectLimits {
    pub max_array_items: usize,
    pub max_depth: usize,
}

impl Default for InspectLimits {
    fn default() -> Self {
        Self {
            max_array_items: 100,
            max_depth: 32,
        }
    }
}

/// Check every list length and the nesting depth of `root`.
///
/// A top-level container sits at depth 1.
pub fn check_structure(root: &Value, limits: InspectLimits) -> Result<(), InspectError> {
    let mut frontier: Vec<(&Value, usize)> = vec![(root, 1)];

    while let Some((value, depth)) = frontier.pop() {
        match value {
            Value::Array(items) => {
                if depth > limits.max_depth {
                    return Err(InspectError::TooDeep { limit: limits.max_depth });
                }
                if items.len() > limits.max_array_items {
                    return Err(InspectError::TooManyItems {
                        limit: limits.max_array_items,
                        found: items.len(),
                    });
                }
                frontier.extend(items.iter().map(|v| (v, depth + 1)));
            }
            Value::Object(map) => {
                if depth > limits.max_depth {
                    return Err(InspectError::TooDeep { limit: limits.max_depth });
                }
                frontier.extend(map.values().map(|v| (v, depth + 1)));
            }
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
        }
    }

    Ok(())
}

/// The parts of a request that get inspected, borrowed for rendering.
#[derive(Debug, Serialize)]
pub struct CombinedView<'a> {
    pub body: &'a Value,
    pub query: &'a Value,
    pub params: &'a Value,
}

impl CombinedView<'_> {
    fn parts(&self) -> [&Value; 3] {
        [self.body, self.query, self.params]
    }
}

/// Runs the structural check, then the pattern rules, over a request view.
#[derive(Debug, Clone, Copy)]
pub struct PayloadInspector {
    limits: InspectLimits,
    patterns: PatternSet,
}

impl PayloadInspector {
    pub fn new(limits: InspectLimits, patterns: PatternSet) -> Self {
        Self { limits, patterns }
    }

    pub fn inspect(&self, view: &CombinedView<'_>) -> Result<(), InspectError> {
        for part in view.parts() {
            check_structure(part, self.limits)?;
        }

        let rendered = serde_json::to_string(view)?;
        match self.patterns.first_match(&rendered) {
            Some(rule) => Err(InspectError::Pattern(rule)),
            None => Ok(()),
        }
    }
}
