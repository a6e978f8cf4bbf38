use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Persona the agent adopts. Advisory: switching sends an instruction update
/// and nothing waits for the service to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMode {
    #[default]
    GameMaster,
    Director,
    Editor,
}

impl AgentMode {
    pub const ALL: [Self; 3] = [Self::GameMaster, Self::Director, Self::Editor];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::GameMaster => "GAME_MASTER",
            Self::Director => "DIRECTOR",
            Self::Editor => "EDITOR",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::GameMaster => "Game Master",
            Self::Director => "Director",
            Self::Editor => "Editor",
        }
    }

    #[must_use]
    pub const fn instruction(self) -> &'static str {
        match self {
            Self::GameMaster => {
                "Act as the game master. Narrate outcomes, keep the rules fair and call \
                 rollCheck whenever an action's success is uncertain."
            }
            Self::Director => {
                "Act as the director. Think in shots: framing, lighting and camera movement. \
                 Propose staging changes with suggestEdit."
            }
            Self::Editor => {
                "Act as the script editor. Tighten prose, fix continuity and offer concrete \
                 rewrites with suggestEdit."
            }
        }
    }

    /// Instruction text sent when this mode becomes active.
    #[must_use]
    pub fn switch_note(self) -> String {
        format!("[MODE {}] {}", self.id(), self.instruction())
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AgentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown agent mode: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for mode in AgentMode::ALL {
            assert_eq!(mode.id().parse::<AgentMode>().unwrap(), mode);
            assert_eq!(
                serde_json::to_value(mode).unwrap(),
                serde_json::Value::String(mode.id().to_string())
            );
        }
        assert!("narrator".parse::<AgentMode>().is_err());
    }
}
