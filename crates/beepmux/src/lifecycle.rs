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

// Mutex::lock().unwrap() is the standard pattern in Rust. The lock only fails
// if the mutex is poisoned (a thread panicked while holding it), which indicates
// a bug elsewhere that should propagate. We also suppress the "missing # Panics"
// warning since these are not user-actionable panics.
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

//! Channel lifecycle.
//!
//! A [`ChannelLifecycle`] tracks the requests outstanding on one channel in
//! both directions and arbitrates closing it. A close, whether asked for
//! locally or by the peer, only proceeds once the channel is quiescent:
//! every request we sent has a terminal reply and every request we
//! received has a terminal response.
//!
//! All mutable state of a channel sits behind a single lock. Legality
//! checks, counter updates and the quiescence check happen under that
//! lock; the session and the application are only called after it has
//! been released, so either may call straight back into the channel.

use crate::error::CorrelationKind;
use crate::management::error_reply;
use crate::tracker::{MessageNumberSequence, ReplyCorrelationTracker};
use crate::{
    ChannelHandler, ChannelNumber, CloseCallback, CloseChannelRequest, CloseDecision, Error,
    Message, MessageNumber, Reply, ReplyHandler, ReplyOutcome, Session, State,
};
use beepmux_control::{codes, ProfileUri};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, trace, warn};

/// Diagnostic sent when the application drops a request unanswered.
const ABANDONED_DIAGNOSTIC: &str = "request abandoned without reply";

/// Lifecycle state together with what each state is waiting to resolve.
enum LifecycleState {
    Alive,
    CloseInitiated {
        /// Taken when the close resolves, or when a peer close request
        /// settles it first.
        callback: Option<Box<dyn CloseCallback>>,
        /// Set once the close has been handed to the session (or made
        /// moot by an accepted peer request).
        negotiating: bool,
    },
    CloseRequested {
        /// Taken once the application has been asked.
        request: Option<Box<dyn CloseChannelRequest>>,
    },
    Dead,
}

impl LifecycleState {
    const fn public(&self) -> State {
        match self {
            Self::Alive => State::Alive,
            Self::CloseInitiated { .. } => State::CloseInitiated,
            Self::CloseRequested { .. } => State::CloseRequested,
            Self::Dead => State::Dead,
        }
    }
}

struct ChannelCore {
    state: LifecycleState,
    tracker: ReplyCorrelationTracker,
}

impl ChannelCore {
    fn transition(&mut self, channel: ChannelNumber, next: LifecycleState) {
        let from = self.state.public();
        let to = next.public();
        debug_assert!(
            from.can_transition_to(to),
            "illegal channel transition {from} -> {to}"
        );
        debug!(channel, %from, %to, "channel state transition");
        self.state = next;
    }

    /// Decides what a quiescent channel must do next.
    ///
    /// Runs under the channel lock, so a given zero-crossing yields at
    /// most one action.
    fn check_quiescence(&mut self) -> Quiescence {
        if !self.tracker.is_quiescent() {
            return Quiescence::Pending;
        }
        match &mut self.state {
            LifecycleState::CloseInitiated { negotiating, .. } if !*negotiating => {
                *negotiating = true;
                Quiescence::Negotiate
            }
            LifecycleState::CloseRequested { request } => {
                request.take().map_or(Quiescence::Pending, Quiescence::Decide)
            }
            _ => Quiescence::Pending,
        }
    }
}

/// Follow-up work computed under the lock and run after releasing it.
enum Quiescence {
    Pending,
    Negotiate,
    Decide(Box<dyn CloseChannelRequest>),
}

struct ChannelInner {
    session: Arc<dyn Session>,
    handler: Weak<dyn ChannelHandler>,
    channel_number: ChannelNumber,
    profile: ProfileUri,
    sequence: MessageNumberSequence,
    core: Mutex<ChannelCore>,
}

/// One channel of a session.
///
/// Cloning is cheap; all clones refer to the same channel.
///
/// # State machine
///
/// ```text
/// Alive ── close_initiated ──► CloseInitiated ── peer accepts ──► Dead
///   │                               └── peer declines ──► Alive
///   └──── close_requested ──► CloseRequested ── app accepts ──► (session closes) Dead
///                                   └── app declines ──► Alive
/// ```
#[derive(Clone)]
pub struct ChannelLifecycle {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for ChannelLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLifecycle")
            .field("channel_number", &self.inner.channel_number)
            .field("profile", &self.inner.profile)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChannelLifecycle {
    /// Creates a live channel.
    ///
    /// The channel keeps only a weak reference to `handler`; the
    /// application owns it.
    pub fn new<H: ChannelHandler + 'static>(
        session: Arc<dyn Session>,
        channel_number: ChannelNumber,
        profile: impl Into<ProfileUri>,
        handler: &Arc<H>,
    ) -> Self {
        let handler: Weak<H> = Arc::downgrade(handler);
        let profile = profile.into();
        debug!(channel = channel_number, %profile, "channel created");
        Self {
            inner: Arc::new(ChannelInner {
                session,
                handler,
                channel_number,
                profile,
                sequence: MessageNumberSequence::new(),
                core: Mutex::new(ChannelCore {
                    state: LifecycleState::Alive,
                    tracker: ReplyCorrelationTracker::new(),
                }),
            }),
        }
    }

    /// Returns the channel number.
    #[must_use]
    pub fn channel_number(&self) -> ChannelNumber {
        self.inner.channel_number
    }

    /// Returns the profile spoken on this channel.
    #[must_use]
    pub fn profile(&self) -> &ProfileUri {
        &self.inner.profile
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.lock().state.public()
    }

    /// Number of sent requests awaiting a terminal reply.
    #[must_use]
    pub fn outstanding_replies(&self) -> u32 {
        self.lock().tracker.outstanding_replies()
    }

    /// Number of received requests awaiting a terminal response.
    #[must_use]
    pub fn outstanding_responses(&self) -> u32 {
        self.lock().tracker.outstanding_responses()
    }

    /// Sends a request on this channel.
    ///
    /// Replies are delivered to `reply_handler`; the terminal one also
    /// releases the correlation. Returns the allocated message number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the channel is alive.
    pub fn send_message(
        &self,
        message: Message,
        reply_handler: Box<dyn ReplyHandler>,
    ) -> Result<MessageNumber, Error> {
        let channel = self.inner.channel_number;
        let (message_number, handler) = {
            let mut core = self.lock();
            if !matches!(core.state, LifecycleState::Alive) {
                let state = core.state.public();
                warn!(channel, %state, "send rejected: channel not alive");
                return Err(Error::invalid_state("send_message", state));
            }
            let handler = TrackedReplyHandler::track(&mut core, self.clone(), reply_handler);
            (self.inner.sequence.next_number(), handler)
        };

        trace!(channel, message_number, "sending message");
        self.inner
            .session
            .send_message(channel, message_number, message, Box::new(handler));
        Ok(message_number)
    }

    /// Delivers a request from the peer to the application.
    ///
    /// The application answers through the [`ResponseSink`] it is handed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] once the channel is dead, or
    /// [`Error::HandlerGone`] if the application dropped its handler.
    pub fn message_received(&self, message: Message, reply: Box<dyn Reply>) -> Result<(), Error> {
        let channel = self.inner.channel_number;
        let Some(handler) = self.inner.handler.upgrade() else {
            warn!(channel, "message dropped: channel handler is gone");
            return Err(Error::HandlerGone(channel));
        };

        let sink = {
            let mut core = self.lock();
            if matches!(core.state, LifecycleState::Dead) {
                warn!(channel, "message received on dead channel");
                return Err(Error::invalid_state("message_received", State::Dead));
            }
            ResponseSink::track(&mut core, self.clone(), reply)
        };

        trace!(channel, "delivering message to handler");
        handler.message_received(message, sink);
        Ok(())
    }

    /// Starts closing the channel at the application's request.
    ///
    /// The close is negotiated with the peer as soon as nothing is
    /// outstanding, which may be immediately. `callback` learns the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the channel is alive.
    pub fn close_initiated(&self, callback: Box<dyn CloseCallback>) -> Result<(), Error> {
        let channel = self.inner.channel_number;
        let action = {
            let mut core = self.lock();
            if !matches!(core.state, LifecycleState::Alive) {
                let state = core.state.public();
                warn!(channel, %state, "close rejected: channel not alive");
                return Err(Error::invalid_state("close_initiated", state));
            }
            core.transition(
                channel,
                LifecycleState::CloseInitiated {
                    callback: Some(callback),
                    negotiating: false,
                },
            );
            core.check_quiescence()
        };
        self.run(action);
        Ok(())
    }

    /// Handles a close the peer asked for.
    ///
    /// While alive, the application decides once the channel is quiescent.
    /// If a local close is already under way the request is accepted at
    /// once: the application has already chosen to close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a peer close is already pending
    /// or the channel is dead.
    pub fn close_requested(&self, request: Box<dyn CloseChannelRequest>) -> Result<(), Error> {
        let channel = self.inner.channel_number;
        let mut core = self.lock();
        match core.state.public() {
            State::Alive => {
                core.transition(
                    channel,
                    LifecycleState::CloseRequested {
                        request: Some(request),
                    },
                );
                let action = core.check_quiescence();
                drop(core);
                self.run(action);
                Ok(())
            }
            State::CloseInitiated => {
                let callback = match &mut core.state {
                    LifecycleState::CloseInitiated {
                        callback,
                        negotiating,
                    } => {
                        // The peer's close supersedes ours.
                        *negotiating = true;
                        callback.take()
                    }
                    _ => None,
                };
                drop(core);

                debug!(channel, "peer close request during local close, accepting");
                if let Some(callback) = callback {
                    callback.close_accepted();
                }
                request.accept();
                Ok(())
            }
            state => {
                warn!(channel, %state, "peer close request rejected in this state");
                Err(Error::invalid_state("close_requested", state))
            }
        }
    }

    /// Tells the application the channel start went through.
    pub fn opened(&self) {
        debug!(channel = self.inner.channel_number, "channel opened");
        if let Some(handler) = self.inner.handler.upgrade() {
            handler.channel_opened(self);
        }
    }

    /// Tells the application the peer refused the channel start.
    pub fn start_failed(&self, code: u16, diagnostic: &str) {
        warn!(channel = self.inner.channel_number, code, diagnostic, "channel start failed");
        if let Some(handler) = self.inner.handler.upgrade() {
            handler.channel_start_failed(code, diagnostic);
        }
    }

    /// Delivers the terminal close notification.
    ///
    /// Forwards to the application and leaves the channel dead. Called by
    /// the session once a close has gone through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the channel is already dead.
    pub fn channel_closed(&self) -> Result<(), Error> {
        let channel = self.inner.channel_number;
        {
            let mut core = self.lock();
            if matches!(core.state, LifecycleState::Dead) {
                return Err(Error::invalid_state("channel_closed", State::Dead));
            }
            core.transition(channel, LifecycleState::Dead);
        }

        debug!(channel, "channel closed");
        if let Some(handler) = self.inner.handler.upgrade() {
            handler.channel_closed();
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ChannelCore> {
        self.inner.core.lock().unwrap()
    }

    /// Releases one correlation and re-checks quiescence atomically with it.
    fn complete(&self, kind: CorrelationKind) -> Result<(), Error> {
        let channel = self.inner.channel_number;
        let action = {
            let mut core = self.lock();
            let released = match kind {
                CorrelationKind::Reply => core.tracker.reply_completed(),
                CorrelationKind::Response => core.tracker.response_completed(),
            };
            if let Err(kind) = released {
                error!(channel, %kind, "terminal reply without outstanding request");
                return Err(Error::CorrelationUnderflow { channel, kind });
            }
            trace!(
                channel,
                %kind,
                replies = core.tracker.outstanding_replies(),
                responses = core.tracker.outstanding_responses(),
                "correlation completed"
            );
            core.check_quiescence()
        };
        self.run(action);
        Ok(())
    }

    fn run(&self, action: Quiescence) {
        let channel = self.inner.channel_number;
        match action {
            Quiescence::Pending => {}
            Quiescence::Negotiate => {
                debug!(channel, "channel quiescent, negotiating close with peer");
                self.inner.session.request_channel_close(
                    channel,
                    Box::new(NegotiatedClose {
                        channel: self.clone(),
                    }),
                );
            }
            Quiescence::Decide(request) => self.decide_close(request),
        }
    }

    fn decide_close(&self, request: Box<dyn CloseChannelRequest>) {
        let channel = self.inner.channel_number;
        let decision = match self.inner.handler.upgrade() {
            Some(handler) => handler.channel_close_requested(),
            None => CloseDecision::Accept,
        };

        match decision {
            CloseDecision::Accept => {
                debug!(channel, "peer close request accepted");
                request.accept();
            }
            CloseDecision::Decline => {
                debug!(channel, "peer close request declined by application");
                {
                    let mut core = self.lock();
                    if matches!(core.state, LifecycleState::CloseRequested { .. }) {
                        core.transition(channel, LifecycleState::Alive);
                    }
                }
                request.reject();
            }
        }
    }

    /// The peer agreed to our close.
    fn close_negotiated(&self) {
        let callback = self.take_close_callback();
        if let Err(e) = self.channel_closed() {
            debug!(channel = self.inner.channel_number, error = %e, "channel already closed");
        }
        if let Some(callback) = callback {
            callback.close_accepted();
        }
    }

    /// The peer refused our close.
    fn close_refused(&self, code: u16, diagnostic: String) {
        let channel = self.inner.channel_number;
        warn!(channel, code, %diagnostic, "peer declined channel close");

        let callback = {
            let mut core = self.lock();
            let callback = match &mut core.state {
                LifecycleState::CloseInitiated { callback, .. } => callback.take(),
                _ => None,
            };
            // Without the callback the close was already settled by a peer
            // request; the channel is on its way out.
            if callback.is_some() {
                core.transition(channel, LifecycleState::Alive);
            }
            callback
        };

        if let Some(callback) = callback {
            callback.close_declined(code, diagnostic);
        }
    }

    fn take_close_callback(&self) -> Option<Box<dyn CloseCallback>> {
        let mut core = self.lock();
        match &mut core.state {
            LifecycleState::CloseInitiated { callback, .. } => callback.take(),
            _ => None,
        }
    }
}

/// Resolves a session-negotiated close back into the channel.
struct NegotiatedClose {
    channel: ChannelLifecycle,
}

impl CloseCallback for NegotiatedClose {
    fn close_accepted(self: Box<Self>) {
        self.channel.close_negotiated();
    }

    fn close_declined(self: Box<Self>, code: u16, diagnostic: String) {
        self.channel.close_refused(code, diagnostic);
    }
}

/// Wraps the caller's reply handler so the terminal reply releases the
/// correlation before the caller sees it.
struct TrackedReplyHandler {
    target: Box<dyn ReplyHandler>,
    channel: ChannelLifecycle,
    completed: bool,
}

impl TrackedReplyHandler {
    /// Registers the outstanding reply; call with the channel lock held.
    fn track(
        core: &mut ChannelCore,
        channel: ChannelLifecycle,
        target: Box<dyn ReplyHandler>,
    ) -> Self {
        core.tracker.reply_expected();
        Self {
            target,
            channel,
            completed: false,
        }
    }
}

impl ReplyHandler for TrackedReplyHandler {
    fn received(&mut self, reply: ReplyOutcome) -> Result<(), Error> {
        if self.completed {
            warn!(
                channel = self.channel.channel_number(),
                reply = reply.keyword(),
                "reply after terminal reply ignored"
            );
            return Ok(());
        }
        if reply.is_terminal() {
            self.completed = true;
            self.channel.complete(CorrelationKind::Reply)?;
        }
        self.target.received(reply)
    }
}

/// Answers one request received on a channel.
///
/// Handed to [`ChannelHandler::message_received`]. Any number of `ANS`
/// may be sent; the terminal reply consumes the sink and releases the
/// correlation, which may let a pending close proceed.
///
/// Dropping a sink without a terminal reply answers the request with
/// [`codes::TRANSACTION_FAILED`] so the correlation is still released.
pub struct ResponseSink {
    target: Box<dyn Reply>,
    channel: ChannelLifecycle,
    completed: bool,
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("channel", &self.channel.channel_number())
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl ResponseSink {
    /// Registers the outstanding response; call with the channel lock held.
    fn track(core: &mut ChannelCore, channel: ChannelLifecycle, target: Box<dyn Reply>) -> Self {
        core.tracker.response_expected();
        Self {
            target,
            channel,
            completed: false,
        }
    }

    /// Returns the number of the channel the request arrived on.
    #[must_use]
    pub fn channel_number(&self) -> ChannelNumber {
        self.channel.channel_number()
    }

    /// Sends one answer in a series; the request stays open.
    pub fn send_ans(&mut self, message: Message) {
        self.target.send(ReplyOutcome::Ans(message));
    }

    /// Ends a series of answers.
    pub fn send_nul(mut self) {
        self.finish(ReplyOutcome::Nul);
    }

    /// Answers with an error.
    pub fn send_err(mut self, message: Message) {
        self.finish(ReplyOutcome::Err(message));
    }

    /// Answers successfully.
    pub fn send_rpy(mut self, message: Message) {
        self.finish(ReplyOutcome::Rpy(message));
    }

    fn finish(&mut self, reply: ReplyOutcome) {
        self.completed = true;
        // The reply goes out before the release can trigger a close.
        self.target.send(reply);
        if let Err(e) = self.channel.complete(CorrelationKind::Response) {
            error!(error = %e, "response bookkeeping failed");
        }
    }
}

impl Drop for ResponseSink {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let channel = self.channel.channel_number();
        warn!(channel, "request dropped without a terminal reply");
        match error_reply(codes::TRANSACTION_FAILED, ABANDONED_DIAGNOSTIC) {
            Ok(message) => self.finish(ReplyOutcome::Err(message)),
            Err(e) => {
                error!(channel, error = %e, "failed to encode abandoned-request error");
                self.completed = true;
                if let Err(e) = self.channel.complete(CorrelationKind::Response) {
                    error!(error = %e, "response bookkeeping failed");
                }
            }
        }
    }
}
