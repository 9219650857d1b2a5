// Copyright 2024-2026 Farlight Networks, LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Channel state machine.
//!
//! Defines the lifecycle states of a channel and valid transitions.

/// Channel lifecycle state.
///
/// A channel progresses through these states:
/// ```text
///         ┌──────────────► CloseInitiated ──┐
///         │  ◄── declined ──────┘           │
/// Alive ──┤                                 ├──► Dead
///         │  ◄── rejected ──────┐           │
///         └──────────────► CloseRequested ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// Open for traffic in both directions.
    #[default]
    Alive,
    /// The local application asked to close; waiting for quiescence and
    /// for the peer's answer.
    CloseInitiated,
    /// The peer asked to close; waiting for quiescence and for the
    /// application's decision.
    CloseRequested,
    /// The channel is closed. Terminal.
    Dead,
}

impl State {
    /// Returns true if new requests may be sent.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Returns true if the channel has closed.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    /// Returns true while a close is being negotiated in either direction.
    #[must_use]
    pub const fn is_shutting_down(&self) -> bool {
        matches!(self, Self::CloseInitiated | Self::CloseRequested)
    }

    /// Returns true if a transition to the target state is valid.
    #[must_use]
    #[allow(clippy::match_same_arms)] // Keep separate for documentation clarity
    pub const fn can_transition_to(&self, target: Self) -> bool {
        use State::{Alive, CloseInitiated, CloseRequested, Dead};

        match (*self, target) {
            // Close negotiation starts from Alive only
            (Alive, CloseInitiated | CloseRequested) => true,

            // A close in progress resolves one way or the other
            (CloseInitiated | CloseRequested, Alive) => true,
            (CloseInitiated | CloseRequested, Dead) => true,

            // The session may tear a live channel down directly
            (Alive, Dead) => true,

            // Everything else is invalid, including leaving Dead
            _ => false,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::CloseInitiated => write!(f, "close-initiated"),
            Self::CloseRequested => write!(f, "close-requested"),
            Self::Dead => write!(f, "dead"),
        }
    }
}
