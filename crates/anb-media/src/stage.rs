//! Pipeline stage identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete transformation step. Stages run strictly in this order,
/// each consuming the previous stage's output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Cut to the maximum clip length with stream copy
    Trim,
    /// Scale into 1280x720 and pad with black bars
    Letterbox,
    /// Wrap the clip with the intro and outro bumpers
    Bumpers,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Trim, Stage::Letterbox, Stage::Bumpers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Trim => "trim",
            Stage::Letterbox => "letterbox",
            Stage::Bumpers => "bumpers",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
