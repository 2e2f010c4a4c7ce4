//! States of the agent loop.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// `Idle -> AwaitingLlm -> (DispatchingTools | Done | Failed)`, with
/// `DispatchingTools -> AwaitingLlm` until `Done` or a limit is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingLlm,
    DispatchingTools,
    Done,
    /// Terminal for the session.
    Failed,
}

impl LoopState {
    /// Whether a new user message may start here.
    pub fn accepts_message(self) -> bool {
        matches!(self, Self::Idle | Self::Done)
    }

    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        match (self, next) {
            (Idle | Done, AwaitingLlm) => true,
            (AwaitingLlm, DispatchingTools | Done) => true,
            (DispatchingTools, AwaitingLlm) => true,
            // Cancellation returns a running loop to idle.
            (AwaitingLlm | DispatchingTools, Idle) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            _ => false,
        }
    }
}
