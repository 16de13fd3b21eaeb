//! Engine lifecycle state

use std::fmt;

use serde::Serialize;

/// Where the engine is in its load/unload lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
    Unloading,
}

impl EngineState {
    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(self, next: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, next),
            (Unloaded, Loading) | (Loading, Ready) | (Loading, Unloaded) | (Ready, Unloading) | (Unloading, Unloaded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loading => "loading",
            EngineState::Ready => "loaded",
            EngineState::Unloading => "unloading",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
