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

//! Collaborator contracts.
//!
//! The core never touches the transport directly. Outbound work is handed
//! to a [`Session`]; inbound deliveries arrive through the callbacks
//! defined here, possibly from a different thread than the one issuing
//! outbound calls.
//!
//! Terminal callback methods take `self: Box<Self>` so each callback
//! resolves at most once.

use crate::lifecycle::{ChannelLifecycle, ResponseSink};
use crate::{ChannelNumber, Error, Message, MessageNumber, ReplyOutcome};
use beepmux_control::{BeepError, ProfileInfo};

/// The session/transport layer driving this core.
///
/// None of these calls may block. Replies and negotiation results are
/// delivered later through the handler or callback passed in.
pub trait Session: Send + Sync {
    /// Transmits a request on a channel.
    fn send_message(
        &self,
        channel: ChannelNumber,
        message_number: MessageNumber,
        message: Message,
        reply_handler: Box<dyn ReplyHandler>,
    );

    /// Negotiates the close of a channel with the peer.
    fn request_channel_close(&self, channel: ChannelNumber, callback: Box<dyn CloseCallback>);

    /// Decides whether to accept a channel the peer wants to open.
    fn channel_start_requested(
        &self,
        channel: ChannelNumber,
        profiles: &[ProfileInfo],
    ) -> StartChannelResponse;

    /// Arbitrates a peer request to close a channel.
    ///
    /// The request may be resolved later, once the channel has drained.
    fn channel_close_requested(&self, channel: ChannelNumber, request: Box<dyn CloseChannelRequest>);

    /// Arbitrates a peer request to close the whole session.
    fn session_close_requested(&self, callback: Box<dyn CloseCallback>);
}

/// Receives the replies to a request this side sent.
pub trait ReplyHandler: Send {
    /// Called once per `ANS` and once for the terminal reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply is illegal for the exchange; the
    /// transport treats that as fatal to the connection.
    fn received(&mut self, reply: ReplyOutcome) -> Result<(), Error>;
}

/// Sends the replies to a request this side received.
pub trait Reply: Send {
    /// Transmits a reply.
    fn send(&mut self, reply: ReplyOutcome);
}

/// Outcome of a close negotiated with the peer.
pub trait CloseCallback: Send {
    /// The close went through.
    fn close_accepted(self: Box<Self>);

    /// The peer declined the close.
    fn close_declined(self: Box<Self>, code: u16, diagnostic: String);
}

/// A close the peer asked for, awaiting a verdict.
pub trait CloseChannelRequest: Send {
    /// Agrees to the close.
    fn accept(self: Box<Self>);

    /// Refuses the close.
    fn reject(self: Box<Self>);
}

/// Outcome of a channel start sent to the peer.
pub trait StartChannelCallback: Send {
    /// The peer accepted one of the candidate profiles.
    fn channel_created(self: Box<Self>, profile: ProfileInfo);

    /// The peer refused the channel.
    fn channel_failed(self: Box<Self>, code: u16, diagnostic: String);
}

/// The session's answer to a channel start requested by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartChannelResponse {
    /// The channel is opened with this profile.
    Accepted(ProfileInfo),
    /// The channel is refused.
    Cancelled(BeepError),
}

impl StartChannelResponse {
    /// Creates a cancellation with the given code and diagnostic.
    #[must_use]
    pub fn cancel(code: u16, diagnostic: impl Into<String>) -> Self {
        Self::Cancelled(BeepError::new(code, diagnostic))
    }
}

/// The application's verdict on a close the peer asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Let the channel close.
    Accept,
    /// Keep the channel open.
    Decline,
}

/// Application-side handler attached to a channel.
pub trait ChannelHandler: Send + Sync {
    /// The peer accepted the channel start; the channel is ready for traffic.
    fn channel_opened(&self, channel: &ChannelLifecycle);

    /// The peer refused the channel start.
    fn channel_start_failed(&self, code: u16, diagnostic: &str);

    /// A request arrived. Answer it through `reply`.
    fn message_received(&self, message: Message, reply: ResponseSink);

    /// The peer wants to close the channel and no work is outstanding.
    fn channel_close_requested(&self) -> CloseDecision;

    /// The channel is closed. Delivered once.
    fn channel_closed(&self);
}
