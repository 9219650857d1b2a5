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

// Poisoned locks in a test double mean a test already panicked.
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

//! Mock collaborators for testing.
//!
//! Provides a recording [`Session`] and a [`Recorder`] implementing every
//! callback trait, so channels and the management protocol can be driven
//! without a transport.

use crate::{
    ChannelHandler, ChannelLifecycle, ChannelNumber, CloseCallback, CloseChannelRequest,
    CloseDecision, Error, Message, MessageNumber, Reply, ReplyHandler, ReplyOutcome, ResponseSink,
    Session, StartChannelCallback, StartChannelResponse,
};
use beepmux_control::{codes, ProfileInfo};
use std::sync::{Arc, Mutex};

/// A request handed to [`MockSession::send_message`].
pub struct SentMessage {
    /// Channel the request was sent on.
    pub channel: ChannelNumber,
    /// Message number allocated for the request.
    pub message_number: MessageNumber,
    /// The request payload.
    pub message: Message,
    /// Handler awaiting the replies.
    pub reply_handler: Box<dyn ReplyHandler>,
}

impl std::fmt::Debug for SentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentMessage")
            .field("channel", &self.channel)
            .field("message_number", &self.message_number)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct MockState {
    sent: Vec<SentMessage>,
    close_requests: Vec<(ChannelNumber, Box<dyn CloseCallback>)>,
    close_request_total: usize,
    start_requests: Vec<(ChannelNumber, Vec<ProfileInfo>)>,
    channel_close_requests: Vec<(ChannelNumber, Box<dyn CloseChannelRequest>)>,
    session_close_requests: Vec<Box<dyn CloseCallback>>,
}

/// A [`Session`] that records every call for later inspection.
///
/// Nothing is delivered back automatically; tests resolve the recorded
/// handlers and callbacks themselves.
pub struct MockSession {
    state: Mutex<MockState>,
    start_response: Mutex<StartChannelResponse>,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession").finish_non_exhaustive()
    }
}

impl MockSession {
    /// Creates a session that cancels every channel start.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_start_response(StartChannelResponse::cancel(
            codes::SERVICE_NOT_AVAILABLE,
            "no profiles registered",
        ))
    }

    /// Creates a session answering channel starts with `response`.
    #[must_use]
    pub fn with_start_response(response: StartChannelResponse) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            start_response: Mutex::new(response),
        })
    }

    /// Removes and returns the requests sent so far.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.state.lock().unwrap().sent)
    }

    /// Number of requests sent and not yet taken.
    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    /// Removes and returns the pending channel close negotiations.
    pub fn take_close_requests(&self) -> Vec<(ChannelNumber, Box<dyn CloseCallback>)> {
        std::mem::take(&mut self.state.lock().unwrap().close_requests)
    }

    /// Total number of channel close negotiations ever requested.
    pub fn close_request_total(&self) -> usize {
        self.state.lock().unwrap().close_request_total
    }

    /// Channel starts the peer asked for, with their candidate profiles.
    pub fn start_requests(&self) -> Vec<(ChannelNumber, Vec<ProfileInfo>)> {
        self.state.lock().unwrap().start_requests.clone()
    }

    /// Removes and returns the peer channel close requests.
    pub fn take_channel_close_requests(&self) -> Vec<(ChannelNumber, Box<dyn CloseChannelRequest>)> {
        std::mem::take(&mut self.state.lock().unwrap().channel_close_requests)
    }

    /// Removes and returns the peer session close requests.
    pub fn take_session_close_requests(&self) -> Vec<Box<dyn CloseCallback>> {
        std::mem::take(&mut self.state.lock().unwrap().session_close_requests)
    }
}

impl Session for MockSession {
    fn send_message(
        &self,
        channel: ChannelNumber,
        message_number: MessageNumber,
        message: Message,
        reply_handler: Box<dyn ReplyHandler>,
    ) {
        self.state.lock().unwrap().sent.push(SentMessage {
            channel,
            message_number,
            message,
            reply_handler,
        });
    }

    fn request_channel_close(&self, channel: ChannelNumber, callback: Box<dyn CloseCallback>) {
        let mut state = self.state.lock().unwrap();
        state.close_request_total += 1;
        state.close_requests.push((channel, callback));
    }

    fn channel_start_requested(
        &self,
        channel: ChannelNumber,
        profiles: &[ProfileInfo],
    ) -> StartChannelResponse {
        self.state
            .lock()
            .unwrap()
            .start_requests
            .push((channel, profiles.to_vec()));
        self.start_response.lock().unwrap().clone()
    }

    fn channel_close_requested(&self, channel: ChannelNumber, request: Box<dyn CloseChannelRequest>) {
        self.state
            .lock()
            .unwrap()
            .channel_close_requests
            .push((channel, request));
    }

    fn session_close_requested(&self, callback: Box<dyn CloseCallback>) {
        self.state
            .lock()
            .unwrap()
            .session_close_requests
            .push(callback);
    }
}

/// Something a [`Recorder`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A reply arrived at a reply handler.
    Received(ReplyOutcome),
    /// A reply was sent through a reply sink.
    Sent(ReplyOutcome),
    /// A close callback was accepted.
    CloseAccepted,
    /// A close callback was declined.
    CloseDeclined {
        /// Reply code.
        code: u16,
        /// Diagnostic text.
        diagnostic: String,
    },
    /// A peer close request was accepted.
    RequestAccepted,
    /// A peer close request was rejected.
    RequestRejected,
    /// A channel start succeeded.
    ChannelCreated(ProfileInfo),
    /// A channel start failed.
    ChannelFailed {
        /// Reply code.
        code: u16,
        /// Diagnostic text.
        diagnostic: String,
    },
    /// A message reached the application.
    MessageReceived(Message),
    /// The application was asked to decide on a peer close.
    CloseDecisionAsked,
    /// The application saw the channel close.
    ChannelClosed,
    /// The application saw the channel open.
    ChannelOpened(ChannelNumber),
    /// The application saw the channel start fail.
    ChannelStartFailed {
        /// Reply code.
        code: u16,
        /// Diagnostic text.
        diagnostic: String,
    },
}

/// Records every callback it receives.
///
/// Clones share the same event log, so a clone can be boxed into a
/// callback slot while the test keeps another to inspect.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Counts the recorded events equal to `event`.
    #[must_use]
    pub fn count(&self, event: &Event) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    /// Returns a boxed clone, for any of the callback slots.
    #[must_use]
    pub fn boxed(&self) -> Box<Self> {
        Box::new(self.clone())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ReplyHandler for Recorder {
    fn received(&mut self, reply: ReplyOutcome) -> Result<(), Error> {
        self.push(Event::Received(reply));
        Ok(())
    }
}

impl Reply for Recorder {
    fn send(&mut self, reply: ReplyOutcome) {
        self.push(Event::Sent(reply));
    }
}

impl CloseCallback for Recorder {
    fn close_accepted(self: Box<Self>) {
        self.push(Event::CloseAccepted);
    }

    fn close_declined(self: Box<Self>, code: u16, diagnostic: String) {
        self.push(Event::CloseDeclined { code, diagnostic });
    }
}

impl CloseChannelRequest for Recorder {
    fn accept(self: Box<Self>) {
        self.push(Event::RequestAccepted);
    }

    fn reject(self: Box<Self>) {
        self.push(Event::RequestRejected);
    }
}

impl StartChannelCallback for Recorder {
    fn channel_created(self: Box<Self>, profile: ProfileInfo) {
        self.push(Event::ChannelCreated(profile));
    }

    fn channel_failed(self: Box<Self>, code: u16, diagnostic: String) {
        self.push(Event::ChannelFailed { code, diagnostic });
    }
}

/// An application handler that records deliveries and keeps the reply
/// sinks it is handed, so tests can answer requests later.
#[derive(Debug)]
pub struct MockHandler {
    recorder: Recorder,
    decision: Mutex<CloseDecision>,
    sinks: Mutex<Vec<ResponseSink>>,
}

impl MockHandler {
    /// Creates a handler that accepts peer close requests.
    #[must_use]
    pub fn new(recorder: &Recorder) -> Arc<Self> {
        Arc::new(Self {
            recorder: recorder.clone(),
            decision: Mutex::new(CloseDecision::Accept),
            sinks: Mutex::new(Vec::new()),
        })
    }

    /// Sets the verdict returned for peer close requests.
    pub fn set_decision(&self, decision: CloseDecision) {
        *self.decision.lock().unwrap() = decision;
    }

    /// Removes and returns the unanswered reply sinks.
    pub fn take_sinks(&self) -> Vec<ResponseSink> {
        std::mem::take(&mut *self.sinks.lock().unwrap())
    }
}

impl ChannelHandler for MockHandler {
    fn channel_opened(&self, channel: &ChannelLifecycle) {
        self.recorder.push(Event::ChannelOpened(channel.channel_number()));
    }

    fn channel_start_failed(&self, code: u16, diagnostic: &str) {
        self.recorder.push(Event::ChannelStartFailed {
            code,
            diagnostic: diagnostic.to_owned(),
        });
    }

    fn message_received(&self, message: Message, reply: ResponseSink) {
        self.recorder.push(Event::MessageReceived(message));
        self.sinks.lock().unwrap().push(reply);
    }

    fn channel_close_requested(&self) -> CloseDecision {
        self.recorder.push(Event::CloseDecisionAsked);
        *self.decision.lock().unwrap()
    }

    fn channel_closed(&self) {
        self.recorder.push(Event::ChannelClosed);
    }
}
