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

//! Channel lifecycle and channel management for BEEP-style sessions.
//!
//! `beepmux` is the control core of a session that multiplexes many
//! request/reply channels over one connection. It does not do framing or
//! I/O; a transport drives it through the [`Session`] trait. It provides:
//!
//! - Per-channel correlation of requests and replies in both directions
//! - A channel state machine that closes a channel only once it is quiescent
//! - The channel management protocol spoken on the control channel
//!
//! # Architecture
//!
//! Each channel is a [`ChannelLifecycle`]. Requests sent on it are tracked
//! until their terminal reply (`RPY`, `ERR` or `NUL`; `ANS` is partial), and
//! requests received on it until the application answers them through a
//! [`ResponseSink`]. A close, local or remote, waits for both counts to
//! reach zero.
//!
//! The [`ChannelManagementProtocol`] runs on channel 0. It exchanges
//! greetings, opens and closes channels, and enforces the channel number
//! parity rule for the peer.
//!
//! # Example
//!
//! ```ignore
//! use beepmux::{ChannelLifecycle, ChannelManagementProtocol, Config, Role};
//!
//! let config = Config::new().with_role(Role::Initiator).with_profile("http://example.org/echo");
//! let management = ChannelManagementProtocol::with_config(session.clone(), &config)?;
//!
//! // Ask the peer for channel 1
//! management.start_channel(1, vec![ProfileInfo::new("http://example.org/echo")], callback)?;
//!
//! // Once created, the channel carries application traffic
//! let channel = ChannelLifecycle::new(session, 1, "http://example.org/echo", &handler);
//! channel.send_message(Message::from_bytes("ping"), reply_handler)?;
//! ```

pub use beepmux_control::{codes, BeepError, Greeting, ProfileInfo, ProfileUri};

mod config;
mod error;
mod lifecycle;
mod management;
mod message;
mod session;
mod state;
mod tracker;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{Config, ConfigError};
pub use error::{CorrelationKind, Error};
pub use lifecycle::{ChannelLifecycle, ResponseSink};
pub use management::{ChannelManagementProtocol, CONTROL_CHANNEL};
pub use message::{Message, ReplyOutcome, DEFAULT_CONTENT_TYPE};
pub use session::{
    ChannelHandler, CloseCallback, CloseChannelRequest, CloseDecision, Reply, ReplyHandler,
    Session, StartChannelCallback, StartChannelResponse,
};
pub use state::State;
pub use tracker::{MessageNumberSequence, ReplyCorrelationTracker, MAX_MESSAGE_NUMBER};

/// Channel number. Channel 0 is the control channel.
pub type ChannelNumber = i32;

/// Message number of a request within a channel.
pub type MessageNumber = u32;

/// Role in a session.
///
/// The initiator opens odd-numbered channels and the listener opens
/// even-numbered ones, so the two sides never pick the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The side that established the connection.
    Initiator,
    /// The side that accepted the connection.
    Listener,
}

impl Role {
    /// Returns true if `channel` is one this side may open.
    #[must_use]
    pub const fn owns_channel(self, channel: ChannelNumber) -> bool {
        if channel <= 0 {
            return false;
        }
        let odd = channel % 2 == 1;
        match self {
            Self::Initiator => odd,
            Self::Listener => !odd,
        }
    }

    /// Returns true if `channel` is one the peer may open.
    #[must_use]
    pub const fn is_peer_channel(self, channel: ChannelNumber) -> bool {
        channel > 0 && !self.owns_channel(channel)
    }

    /// Names the parity of channels the peer may open.
    #[must_use]
    pub const fn expected_peer_parity(self) -> &'static str {
        match self {
            Self::Initiator => "even",
            Self::Listener => "odd",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Listener => write!(f, "listener"),
        }
    }
}
