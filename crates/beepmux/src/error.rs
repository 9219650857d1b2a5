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

//! Error types for beepmux channels and channel management.

use crate::{ChannelNumber, State};
use beepmux_control::{CodecError, ControlError};
use thiserror::Error;

/// Errors that can occur during channel and channel management operations.
///
/// Negotiated declines (a peer answering a start or close with an `error`
/// record) are not errors; they are delivered through the same callbacks
/// as acceptance.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer sent something the protocol forbids.
    ///
    /// Fatal to the exchange; the owning session decides what happens to
    /// the connection.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The operation is not legal in the channel's current state.
    #[error("{operation} is not allowed in the {state} state")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The channel state at the time of the call.
        state: State,
    },

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The application handler attached to the channel has been dropped.
    #[error("channel {0} has no live handler")]
    HandlerGone(ChannelNumber),

    /// A correlation counter would have gone negative.
    #[error("channel {channel}: {kind} completed without a matching request")]
    CorrelationUnderflow {
        /// The channel whose counter underflowed.
        channel: ChannelNumber,
        /// Which counter underflowed.
        kind: CorrelationKind,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A management record could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    /// Creates a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Creates an invalid state error.
    #[must_use]
    pub const fn invalid_state(operation: &'static str, state: State) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Returns true if the error was caused by the peer.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

impl From<ControlError> for Error {
    /// Decode-side record errors always mean the peer sent something illegal.
    fn from(error: ControlError) -> Self {
        Self::ProtocolViolation(error.to_string())
    }
}

/// The two correlation counters kept per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationKind {
    /// Requests sent by this side awaiting a terminal reply.
    Reply,
    /// Requests received by this side awaiting a terminal response.
    Response,
}

impl std::fmt::Display for CorrelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reply => write!(f, "reply"),
            Self::Response => write!(f, "response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::invalid_state("send_message", State::Dead);
        assert_eq!(
            err.to_string(),
            "send_message is not allowed in the dead state"
        );

        let err = Error::CorrelationUnderflow {
            channel: 3,
            kind: CorrelationKind::Response,
        };
        assert!(err.to_string().contains("channel 3"));
        assert!(err.to_string().contains("response"));
    }

    #[test]
    fn control_errors_are_protocol_violations() {
        let err: Error = ControlError::EmptyProfileList.into();
        assert!(err.is_protocol_violation());
        assert!(err.to_string().contains("no profiles"));
    }

    #[test]
    fn local_errors_are_not_protocol_violations() {
        assert!(!Error::InvalidArgument("x").is_protocol_violation());
        assert!(!Error::HandlerGone(1).is_protocol_violation());
    }
}
