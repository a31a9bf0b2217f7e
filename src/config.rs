// Knobs the transport reads at construction. Anything left out of the json
// keeps its default.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::SessionKind;
use crate::shared::LoopMode;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub session_kind: SessionKind, // what play() creates when nothing is installed
    pub loop_mode: LoopMode,
    pub clock_tick_ms: u64,           // how often the clock device reports position
    pub clock_command_capacity: usize, // bounded queue into the clock thread
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            session_kind: SessionKind::Dynamic,
            loop_mode: LoopMode::Off,
            clock_tick_ms: 20,
            clock_command_capacity: 256,
        }
    }
}

impl TransportConfig {
    pub fn clock_tick(&self) -> Duration {
        Duration::from_millis(self.clock_tick_ms.max(1))
    }
}
