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

//! Channel management protocol.
//!
//! Runs on the control channel (channel 0) and handles:
//! - Greetings and session start refusal
//! - Opening channels, in both directions
//! - Closing channels and the session, in both directions
//!
//! Every exchange is a single request answered by `RPY` or `ERR`. Any
//! other reply on the control channel is a protocol violation.

use crate::tracker::MessageNumberSequence;
use crate::{
    ChannelNumber, CloseCallback, CloseChannelRequest, Config, Error, Message, MessageNumber,
    Reply, ReplyHandler, ReplyOutcome, Role, Session, StartChannelCallback, StartChannelResponse,
};
use beepmux_control::{
    codes, BeepError, BincodeCodec, Close, Codec, ControlError, Greeting, ManagementMessage,
    ProfileInfo, ProfileUri, Start, MANAGEMENT_CONTENT_TYPE,
};
use std::sync::Arc;
use tracing::{debug, error, instrument, trace, warn};

/// The control channel.
pub const CONTROL_CHANNEL: ChannelNumber = 0;

/// Diagnostic sent with [`codes::STILL_WORKING`] when a close is refused.
const STILL_WORKING_DIAGNOSTIC: &str = "still working";

const CODEC: BincodeCodec = BincodeCodec::new();

fn encode(record: &ManagementMessage) -> Result<Message, Error> {
    let body = CODEC.encode_message(record)?;
    Ok(Message::new(MANAGEMENT_CONTENT_TYPE, body))
}

fn decode(message: &Message) -> Result<ManagementMessage, Error> {
    if message.content_type() != MANAGEMENT_CONTENT_TYPE {
        return Err(Error::protocol_violation(format!(
            "unexpected content type on control channel: {}",
            message.content_type()
        )));
    }
    CODEC
        .decode_message(message.body())
        .map_err(|e| Error::protocol_violation(format!("malformed management message: {e}")))
}

/// Encodes an `error` record for use as an `ERR` body.
pub(crate) fn error_reply(code: u16, diagnostic: &str) -> Result<Message, Error> {
    encode(&ManagementMessage::Error(BeepError::new(code, diagnostic)))
}

/// Sends a record as a terminal reply, logging if it cannot be encoded.
fn answer(
    reply: &mut dyn Reply,
    outcome: fn(Message) -> ReplyOutcome,
    record: &ManagementMessage,
) {
    match encode(record) {
        Ok(message) => reply.send(outcome(message)),
        Err(e) => error!(error = %e, record = record.kind(), "failed to encode management reply"),
    }
}

/// The management protocol endpoint of a session.
///
/// Holds no per-channel state: channels are tracked by their
/// [`ChannelLifecycle`](crate::ChannelLifecycle), and outcomes are
/// reported through callbacks.
pub struct ChannelManagementProtocol {
    session: Arc<dyn Session>,
    role: Role,
    profiles: Vec<ProfileUri>,
    sequence: MessageNumberSequence,
}

impl std::fmt::Debug for ChannelManagementProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManagementProtocol")
            .field("role", &self.role)
            .field("profiles", &self.profiles)
            .finish_non_exhaustive()
    }
}

impl ChannelManagementProtocol {
    /// Creates the protocol endpoint for a session with no advertised
    /// profiles.
    pub fn new(session: Arc<dyn Session>, role: Role) -> Self {
        Self {
            session,
            role,
            profiles: Vec::new(),
            sequence: MessageNumberSequence::new(),
        }
    }

    /// Creates the protocol endpoint from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_config(session: Arc<dyn Session>, config: &Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            profiles: config.profiles.clone(),
            ..Self::new(session, config.role)
        })
    }

    /// Returns our role in the session.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the profiles advertised by [`send_local_greeting`](Self::send_local_greeting).
    #[must_use]
    pub fn profiles(&self) -> &[ProfileUri] {
        &self.profiles
    }

    /// Sends a greeting advertising `profiles` as the reply to the
    /// session's initial exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a profile is listed twice.
    pub fn send_greeting(
        &self,
        profiles: &[ProfileUri],
        mut reply: Box<dyn Reply>,
    ) -> Result<(), Error> {
        let greeting = Greeting::new(profiles.iter().cloned());
        if greeting.validate().is_err() {
            return Err(Error::InvalidArgument("greeting lists a profile twice"));
        }
        debug!(profiles = profiles.len(), "sending greeting");
        let message = encode(&ManagementMessage::Greeting(greeting))?;
        reply.send(ReplyOutcome::Rpy(message));
        Ok(())
    }

    /// Sends a greeting advertising the configured profiles.
    ///
    /// # Errors
    ///
    /// See [`send_greeting`](Self::send_greeting).
    pub fn send_local_greeting(&self, reply: Box<dyn Reply>) -> Result<(), Error> {
        self.send_greeting(&self.profiles, reply)
    }

    /// Refuses the session in place of a greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn send_session_start_declined(
        &self,
        code: u16,
        diagnostic: &str,
        mut reply: Box<dyn Reply>,
    ) -> Result<(), Error> {
        debug!(code, diagnostic, "declining session start");
        reply.send(ReplyOutcome::Err(error_reply(code, diagnostic)?));
        Ok(())
    }

    /// Decodes the peer's greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the message is not a valid
    /// greeting.
    pub fn received_greeting(&self, message: &Message) -> Result<Greeting, Error> {
        let greeting = decode(message)?.into_greeting()?;
        debug!(profiles = greeting.profiles.len(), "received greeting");
        Ok(greeting)
    }

    /// Decodes the peer's refusal of the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the message is not an
    /// error record.
    pub fn received_error(&self, message: &Message) -> Result<BeepError, Error> {
        let error = decode(message)?.into_error()?;
        debug!(code = error.code, diagnostic = %error.diagnostic, "received session start error");
        Ok(error)
    }

    /// Asks the peer to open `channel` with one of `profiles`.
    ///
    /// `callback` learns whether the channel was created and with which
    /// profile. Returns the message number of the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a non-positive channel
    /// number or an empty candidate list.
    #[instrument(skip_all, fields(channel = channel))]
    pub fn start_channel(
        &self,
        channel: ChannelNumber,
        profiles: Vec<ProfileInfo>,
        callback: Box<dyn StartChannelCallback>,
    ) -> Result<MessageNumber, Error> {
        if channel <= CONTROL_CHANNEL {
            return Err(Error::InvalidArgument("channel number must be positive"));
        }
        if profiles.is_empty() {
            return Err(Error::InvalidArgument("start request needs at least one profile"));
        }
        let message = encode(&ManagementMessage::Start(Start::new(channel, profiles)))?;
        let message_number = self.sequence.next_number();

        debug!(message_number, "requesting channel start");
        self.session.send_message(
            CONTROL_CHANNEL,
            message_number,
            message,
            Box::new(StartReplyHandler {
                channel,
                callback: Some(callback),
            }),
        );
        Ok(message_number)
    }

    /// Asks the peer to close `channel`.
    ///
    /// Closing channel 0 closes the session. Returns the message number
    /// of the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a negative channel number.
    #[instrument(skip_all, fields(channel = channel))]
    pub fn close_channel(
        &self,
        channel: ChannelNumber,
        callback: Box<dyn CloseCallback>,
    ) -> Result<MessageNumber, Error> {
        if channel < CONTROL_CHANNEL {
            return Err(Error::InvalidArgument("channel number must not be negative"));
        }
        let message = encode(&ManagementMessage::Close(Close::new(channel)))?;
        let message_number = self.sequence.next_number();

        debug!(message_number, "requesting channel close");
        self.session.send_message(
            CONTROL_CHANNEL,
            message_number,
            message,
            Box::new(CloseReplyHandler {
                channel,
                callback: Some(callback),
            }),
        );
        Ok(message_number)
    }

    /// Asks the peer to close the session.
    ///
    /// # Errors
    ///
    /// See [`close_channel`](Self::close_channel).
    pub fn close_session(&self, callback: Box<dyn CloseCallback>) -> Result<MessageNumber, Error> {
        self.close_channel(CONTROL_CHANNEL, callback)
    }

    /// Handles the peer's request to open `channel`.
    ///
    /// A channel number of the wrong parity is refused with
    /// [`codes::ILLEGAL_PARITY`] without consulting the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a non-positive channel
    /// number or an empty candidate list. Nothing is sent in that case.
    #[instrument(skip_all, fields(channel = channel))]
    pub fn start_channel_requested(
        &self,
        channel: ChannelNumber,
        profiles: &[ProfileInfo],
        mut reply: Box<dyn Reply>,
    ) -> Result<(), Error> {
        if channel <= CONTROL_CHANNEL {
            warn!("peer requested start of a non-positive channel");
            return Err(Error::protocol_violation(format!(
                "start requested for channel {channel}"
            )));
        }
        if profiles.is_empty() {
            warn!("peer requested start without profiles");
            return Err(ControlError::EmptyProfileList.into());
        }

        if !self.role.is_peer_channel(channel) {
            let parity = self.role.expected_peer_parity();
            warn!(expected = parity, "peer requested channel with illegal parity");
            let refusal = BeepError::new(
                codes::ILLEGAL_PARITY,
                format!("illegal channel number parity: expected {parity}"),
            );
            reply.send(ReplyOutcome::Err(encode(&ManagementMessage::Error(refusal))?));
            return Ok(());
        }

        debug!(candidates = profiles.len(), "peer requested channel start");
        match self.session.channel_start_requested(channel, profiles) {
            StartChannelResponse::Accepted(profile) => {
                debug!(profile = %profile.uri, "channel start accepted");
                reply.send(ReplyOutcome::Rpy(encode(&ManagementMessage::Profile(profile))?));
            }
            StartChannelResponse::Cancelled(error) => {
                debug!(code = error.code, diagnostic = %error.diagnostic, "channel start refused");
                reply.send(ReplyOutcome::Err(encode(&ManagementMessage::Error(error))?));
            }
        }
        Ok(())
    }

    /// Handles the peer's request to close `channel`.
    ///
    /// The session resolves the request, possibly later; an acceptance is
    /// answered with `ok`, a refusal with [`codes::STILL_WORKING`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a negative channel number.
    #[instrument(skip_all, fields(channel = channel))]
    pub fn close_channel_requested(
        &self,
        channel: ChannelNumber,
        reply: Box<dyn Reply>,
    ) -> Result<(), Error> {
        if channel < CONTROL_CHANNEL {
            warn!("peer requested close of a negative channel");
            return Err(Error::protocol_violation(format!(
                "close requested for channel {channel}"
            )));
        }
        debug!("peer requested channel close");
        self.session
            .channel_close_requested(channel, Box::new(PeerCloseRequest { channel, reply }));
        Ok(())
    }

    /// Handles the peer's request to close the session.
    ///
    /// The session arbitrates; an acceptance is answered with `ok`, a
    /// refusal with the code and diagnostic the session supplies.
    #[instrument(skip_all)]
    pub fn close_session_requested(&self, reply: Box<dyn Reply>) {
        debug!("peer requested session close");
        self.session
            .session_close_requested(Box::new(SessionCloseReply { reply }));
    }

    /// Dispatches a request received on the control channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the message is not a start
    /// or close request, or if the request itself is illegal.
    pub fn message_received(&self, message: &Message, reply: Box<dyn Reply>) -> Result<(), Error> {
        let record = decode(message)?;
        trace!(record = record.kind(), "management request received");
        match record {
            ManagementMessage::Start(start) => {
                self.start_channel_requested(start.channel, &start.profiles, reply)
            }
            ManagementMessage::Close(close) if close.channel == CONTROL_CHANNEL => {
                self.close_session_requested(reply);
                Ok(())
            }
            ManagementMessage::Close(close) => self.close_channel_requested(close.channel, reply),
            other => {
                warn!(record = other.kind(), "unexpected management request");
                Err(Error::protocol_violation(format!(
                    "unexpected {} request on control channel",
                    other.kind()
                )))
            }
        }
    }
}

fn illegal_reply(request: &str, reply: &ReplyOutcome) -> Error {
    warn!(request, reply = reply.keyword(), "illegal reply on control channel");
    Error::protocol_violation(format!(
        "{} reply to {request} request on control channel",
        reply.keyword()
    ))
}

/// Resolves the peer's answer to our start request.
struct StartReplyHandler {
    channel: ChannelNumber,
    callback: Option<Box<dyn StartChannelCallback>>,
}

impl ReplyHandler for StartReplyHandler {
    fn received(&mut self, reply: ReplyOutcome) -> Result<(), Error> {
        let channel = self.channel;
        match reply {
            ReplyOutcome::Rpy(message) => {
                let profile = decode(&message)?.into_profile()?;
                debug!(channel, profile = %profile.uri, "peer created channel");
                if let Some(callback) = self.callback.take() {
                    callback.channel_created(profile);
                }
                Ok(())
            }
            ReplyOutcome::Err(message) => {
                let error = decode(&message)?.into_error()?;
                debug!(channel, code = error.code, diagnostic = %error.diagnostic, "peer refused channel");
                if let Some(callback) = self.callback.take() {
                    callback.channel_failed(error.code, error.diagnostic);
                }
                Ok(())
            }
            other => Err(illegal_reply("start", &other)),
        }
    }
}

/// Resolves the peer's answer to our close request.
struct CloseReplyHandler {
    channel: ChannelNumber,
    callback: Option<Box<dyn CloseCallback>>,
}

impl ReplyHandler for CloseReplyHandler {
    fn received(&mut self, reply: ReplyOutcome) -> Result<(), Error> {
        let channel = self.channel;
        match reply {
            ReplyOutcome::Rpy(message) => {
                decode(&message)?.into_ok()?;
                debug!(channel, "peer accepted close");
                if let Some(callback) = self.callback.take() {
                    callback.close_accepted();
                }
                Ok(())
            }
            ReplyOutcome::Err(message) => {
                let error = decode(&message)?.into_error()?;
                debug!(channel, code = error.code, diagnostic = %error.diagnostic, "peer declined close");
                if let Some(callback) = self.callback.take() {
                    callback.close_declined(error.code, error.diagnostic);
                }
                Ok(())
            }
            other => Err(illegal_reply("close", &other)),
        }
    }
}

/// A peer channel close awaiting the session's verdict.
struct PeerCloseRequest {
    channel: ChannelNumber,
    reply: Box<dyn Reply>,
}

impl CloseChannelRequest for PeerCloseRequest {
    fn accept(mut self: Box<Self>) {
        debug!(channel = self.channel, "accepting peer close");
        answer(&mut *self.reply, ReplyOutcome::Rpy, &ManagementMessage::Ok);
    }

    fn reject(mut self: Box<Self>) {
        debug!(channel = self.channel, "rejecting peer close");
        let refusal = BeepError::new(codes::STILL_WORKING, STILL_WORKING_DIAGNOSTIC);
        answer(
            &mut *self.reply,
            ReplyOutcome::Err,
            &ManagementMessage::Error(refusal),
        );
    }
}

/// A peer session close awaiting the session's verdict.
struct SessionCloseReply {
    reply: Box<dyn Reply>,
}

impl CloseCallback for SessionCloseReply {
    fn close_accepted(mut self: Box<Self>) {
        debug!("accepting peer session close");
        answer(&mut *self.reply, ReplyOutcome::Rpy, &ManagementMessage::Ok);
    }

    fn close_declined(mut self: Box<Self>, code: u16, diagnostic: String) {
        debug!(code, %diagnostic, "declining peer session close");
        answer(
            &mut *self.reply,
            ReplyOutcome::Err,
            &ManagementMessage::Error(BeepError::new(code, diagnostic)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, MockSession, Recorder};

    const ECHO: &str = "http://example.org/beep/echo";

    fn record(message: &Message) -> ManagementMessage {
        decode(message).unwrap()
    }

    fn mgmt(record: &ManagementMessage) -> Message {
        encode(record).unwrap()
    }

    /// Decodes the single reply a recorder has sent.
    fn sent_reply(recorder: &Recorder) -> (&'static str, ManagementMessage) {
        let events = recorder.events();
        assert_eq!(events.len(), 1, "expected exactly one reply: {events:?}");
        match &events[0] {
            Event::Sent(ReplyOutcome::Rpy(m)) => ("RPY", record(m)),
            Event::Sent(ReplyOutcome::Err(m)) => ("ERR", record(m)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn protocol(session: &Arc<MockSession>, role: Role) -> ChannelManagementProtocol {
        ChannelManagementProtocol::new(session.clone(), role)
    }

    #[test]
    fn greeting_is_sent_as_rpy() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        p.send_greeting(&[ProfileUri::from(ECHO)], recorder.boxed()).unwrap();

        let (keyword, sent) = sent_reply(&recorder);
        assert_eq!(keyword, "RPY");
        assert_eq!(sent, ManagementMessage::Greeting(Greeting::new([ProfileUri::from(ECHO)])));
        assert_eq!(session.sent_count(), 0);
    }

    #[test]
    fn greeting_with_duplicates_is_refused_locally() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();
        let profiles = [ProfileUri::from(ECHO), ProfileUri::from(ECHO)];

        let err = p.send_greeting(&profiles, recorder.boxed()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn local_greeting_uses_configured_profiles() {
        let session = MockSession::new();
        let config = Config::new().with_role(Role::Listener).with_profile(ECHO);
        let p = ChannelManagementProtocol::with_config(session, &config).unwrap();
        assert_eq!(p.role(), Role::Listener);

        let recorder = Recorder::new();
        p.send_local_greeting(recorder.boxed()).unwrap();
        let (_, sent) = sent_reply(&recorder);
        assert_eq!(sent, ManagementMessage::Greeting(Greeting::new([ProfileUri::from(ECHO)])));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let session = MockSession::new();
        let config = Config::new().with_profile(ECHO).with_profile(ECHO);
        let err = ChannelManagementProtocol::with_config(session, &config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn session_start_declined_is_sent_as_err() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        p.send_session_start_declined(codes::SERVICE_NOT_AVAILABLE, "go away", recorder.boxed())
            .unwrap();

        let (keyword, sent) = sent_reply(&recorder);
        assert_eq!(keyword, "ERR");
        assert_eq!(
            sent,
            ManagementMessage::Error(BeepError::new(codes::SERVICE_NOT_AVAILABLE, "go away"))
        );
    }

    #[test]
    fn received_greeting_and_error_decode() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);

        let greeting = Greeting::new([ProfileUri::from(ECHO)]);
        let decoded = p
            .received_greeting(&mgmt(&ManagementMessage::Greeting(greeting.clone())))
            .unwrap();
        assert_eq!(decoded, greeting);

        let error = BeepError::new(554, "transaction failed");
        let decoded = p
            .received_error(&mgmt(&ManagementMessage::Error(error.clone())))
            .unwrap();
        assert_eq!(decoded, error);
    }

    #[test]
    fn malformed_input_is_a_protocol_violation() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);

        let garbage = Message::new(MANAGEMENT_CONTENT_TYPE, vec![0xff, 0xff, 0xff, 0xff]);
        assert!(p.received_greeting(&garbage).unwrap_err().is_protocol_violation());

        let wrong_type = Message::new("text/plain", mgmt(&ManagementMessage::Ok).into_body());
        assert!(p.received_error(&wrong_type).unwrap_err().is_protocol_violation());

        let wrong_kind = mgmt(&ManagementMessage::Ok);
        assert!(p.received_greeting(&wrong_kind).unwrap_err().is_protocol_violation());

        let duplicate = mgmt(&ManagementMessage::Greeting(Greeting::new([
            ProfileUri::from(ECHO),
            ProfileUri::from(ECHO),
        ])));
        assert!(p.received_greeting(&duplicate).unwrap_err().is_protocol_violation());
    }

    #[test]
    fn start_channel_sends_start_on_control_channel() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();
        let profiles = vec![ProfileInfo::new(ECHO)];

        let first = p.start_channel(1, profiles.clone(), recorder.boxed()).unwrap();
        let second = p.start_channel(3, profiles.clone(), recorder.boxed()).unwrap();
        assert_eq!((first, second), (1, 2));

        let sent = session.take_sent();
        assert_eq!(sent[0].channel, CONTROL_CHANNEL);
        assert_eq!(sent[0].message.content_type(), MANAGEMENT_CONTENT_TYPE);
        assert_eq!(
            record(&sent[0].message),
            ManagementMessage::Start(Start::new(1, profiles))
        );
    }

    #[test]
    fn start_channel_outcomes_reach_callback() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();
        let profile = ProfileInfo::new(ECHO).with_content("init");

        p.start_channel(1, vec![profile.clone()], recorder.boxed()).unwrap();
        p.start_channel(3, vec![profile.clone()], recorder.boxed()).unwrap();
        let mut sent = session.take_sent();

        sent[0]
            .reply_handler
            .received(ReplyOutcome::Rpy(mgmt(&ManagementMessage::Profile(profile.clone()))))
            .unwrap();
        sent[1]
            .reply_handler
            .received(ReplyOutcome::Err(mgmt(&ManagementMessage::Error(BeepError::new(
                504, "nope",
            )))))
            .unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                Event::ChannelCreated(profile),
                Event::ChannelFailed {
                    code: 504,
                    diagnostic: "nope".into()
                },
            ]
        );
    }

    #[test]
    fn start_channel_rejects_bad_arguments() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        assert!(matches!(
            p.start_channel(1, Vec::new(), recorder.boxed()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            p.start_channel(0, vec![ProfileInfo::new(ECHO)], recorder.boxed()),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(session.sent_count(), 0);
    }

    #[test]
    fn ans_or_nul_on_management_exchange_is_fatal() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        p.start_channel(1, vec![ProfileInfo::new(ECHO)], recorder.boxed()).unwrap();
        p.close_channel(1, recorder.boxed()).unwrap();
        let mut sent = session.take_sent();

        let err = sent[0]
            .reply_handler
            .received(ReplyOutcome::Ans(mgmt(&ManagementMessage::Ok)))
            .unwrap_err();
        assert!(err.is_protocol_violation());

        let err = sent[1].reply_handler.received(ReplyOutcome::Nul).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn close_channel_carries_success_code() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        p.close_channel(5, recorder.boxed()).unwrap();
        let mut sent = session.take_sent();
        assert_eq!(sent[0].channel, CONTROL_CHANNEL);
        assert_eq!(
            record(&sent[0].message),
            ManagementMessage::Close(Close {
                channel: 5,
                code: codes::SUCCESS
            })
        );

        sent[0]
            .reply_handler
            .received(ReplyOutcome::Rpy(mgmt(&ManagementMessage::Ok)))
            .unwrap();
        assert_eq!(recorder.events(), vec![Event::CloseAccepted]);
    }

    #[test]
    fn close_rpy_must_be_ok() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        p.close_channel(5, recorder.boxed()).unwrap();
        let err = session.take_sent()[0]
            .reply_handler
            .received(ReplyOutcome::Rpy(mgmt(&ManagementMessage::Profile(
                ProfileInfo::new(ECHO),
            ))))
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn close_session_targets_channel_zero() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        p.close_session(recorder.boxed()).unwrap();
        let mut sent = session.take_sent();
        assert_eq!(
            record(&sent[0].message),
            ManagementMessage::Close(Close::new(CONTROL_CHANNEL))
        );

        sent[0]
            .reply_handler
            .received(ReplyOutcome::Err(mgmt(&ManagementMessage::Error(BeepError::new(
                550,
                "still working",
            )))))
            .unwrap();
        assert_eq!(
            recorder.events(),
            vec![Event::CloseDeclined {
                code: 550,
                diagnostic: "still working".into()
            }]
        );
    }

    #[test]
    fn peer_start_with_own_parity_is_refused_with_501() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        p.start_channel_requested(3, &[ProfileInfo::new(ECHO)], recorder.boxed())
            .unwrap();

        let (keyword, sent) = sent_reply(&recorder);
        assert_eq!(keyword, "ERR");
        let ManagementMessage::Error(error) = sent else {
            panic!("expected error record, got {sent:?}");
        };
        assert_eq!(error.code, codes::ILLEGAL_PARITY);
        assert!(error.diagnostic.starts_with("illegal channel number parity"));
        assert!(error.diagnostic.contains("even"));
        assert!(session.start_requests().is_empty());
    }

    #[test]
    fn listener_expects_odd_peer_channels() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        p.start_channel_requested(2, &[ProfileInfo::new(ECHO)], recorder.boxed())
            .unwrap();
        let (_, sent) = sent_reply(&recorder);
        assert!(matches!(sent, ManagementMessage::Error(BeepError { code: 501, ref diagnostic }) if diagnostic.contains("odd")));
    }

    #[test]
    fn peer_start_accepted_by_session() {
        let profile = ProfileInfo::new(ECHO).with_content("hello");
        let session = MockSession::with_start_response(StartChannelResponse::Accepted(profile.clone()));
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        p.start_channel_requested(1, &[ProfileInfo::new(ECHO)], recorder.boxed())
            .unwrap();

        assert_eq!(session.start_requests(), vec![(1, vec![ProfileInfo::new(ECHO)])]);
        let (keyword, sent) = sent_reply(&recorder);
        assert_eq!(keyword, "RPY");
        assert_eq!(sent, ManagementMessage::Profile(profile));
    }

    #[test]
    fn peer_start_cancelled_by_session() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        p.start_channel_requested(1, &[ProfileInfo::new(ECHO)], recorder.boxed())
            .unwrap();

        let (keyword, sent) = sent_reply(&recorder);
        assert_eq!(keyword, "ERR");
        assert_eq!(
            sent,
            ManagementMessage::Error(BeepError::new(
                codes::SERVICE_NOT_AVAILABLE,
                "no profiles registered"
            ))
        );
    }

    #[test]
    fn peer_start_of_non_positive_channel_is_fatal() {
        for role in [Role::Initiator, Role::Listener] {
            let session = MockSession::new();
            let p = protocol(&session, role);
            let recorder = Recorder::new();

            for channel in [0, -1, -2] {
                let err = p
                    .start_channel_requested(channel, &[ProfileInfo::new(ECHO)], recorder.boxed())
                    .unwrap_err();
                assert!(err.is_protocol_violation(), "{role}: channel {channel}");
            }
            let peer_channel = if role == Role::Initiator { 2 } else { 1 };
            let err = p
                .start_channel_requested(peer_channel, &[], recorder.boxed())
                .unwrap_err();
            assert!(err.is_protocol_violation());

            assert!(recorder.events().is_empty());
            assert!(session.start_requests().is_empty());
        }
    }

    #[test]
    fn peer_close_of_negative_channel_is_fatal() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let recorder = Recorder::new();

        let err = p.close_channel_requested(-1, recorder.boxed()).unwrap_err();
        assert!(err.is_protocol_violation());

        let close = mgmt(&ManagementMessage::Close(Close::new(-3)));
        let err = p.message_received(&close, recorder.boxed()).unwrap_err();
        assert!(err.is_protocol_violation());

        assert!(session.take_channel_close_requests().is_empty());
        assert!(session.take_session_close_requests().is_empty());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn peer_close_accept_and_reject() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let accepted = Recorder::new();
        let rejected = Recorder::new();

        p.close_channel_requested(2, accepted.boxed()).unwrap();
        p.close_channel_requested(4, rejected.boxed()).unwrap();

        let mut requests = session.take_channel_close_requests();
        assert_eq!(requests.len(), 2);
        let (channel, reject) = requests.pop().unwrap();
        assert_eq!(channel, 4);
        reject.reject();
        let (_, accept) = requests.pop().unwrap();
        accept.accept();

        assert_eq!(sent_reply(&accepted), ("RPY", ManagementMessage::Ok));
        assert_eq!(
            sent_reply(&rejected),
            (
                "ERR",
                ManagementMessage::Error(BeepError::new(codes::STILL_WORKING, "still working"))
            )
        );
    }

    #[test]
    fn peer_session_close_accept_and_decline() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Initiator);
        let accepted = Recorder::new();
        let declined = Recorder::new();

        p.close_session_requested(accepted.boxed());
        p.close_session_requested(declined.boxed());

        let mut callbacks = session.take_session_close_requests();
        callbacks.pop().unwrap().close_declined(421, "busy".into());
        callbacks.pop().unwrap().close_accepted();

        assert_eq!(sent_reply(&accepted), ("RPY", ManagementMessage::Ok));
        assert_eq!(
            sent_reply(&declined),
            ("ERR", ManagementMessage::Error(BeepError::new(421, "busy")))
        );
    }

    #[test]
    fn inbound_requests_are_dispatched() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        let start = mgmt(&ManagementMessage::Start(Start::new(
            1,
            vec![ProfileInfo::new(ECHO)],
        )));
        p.message_received(&start, recorder.boxed()).unwrap();
        assert_eq!(session.start_requests().len(), 1);

        p.message_received(&mgmt(&ManagementMessage::Close(Close::new(0))), recorder.boxed())
            .unwrap();
        assert_eq!(session.take_session_close_requests().len(), 1);
        assert!(session.take_channel_close_requests().is_empty());

        p.message_received(&mgmt(&ManagementMessage::Close(Close::new(1))), recorder.boxed())
            .unwrap();
        let requests = session.take_channel_close_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, 1);
    }

    #[test]
    fn inbound_non_request_is_a_protocol_violation() {
        let session = MockSession::new();
        let p = protocol(&session, Role::Listener);
        let recorder = Recorder::new();

        for record in [
            ManagementMessage::Ok,
            ManagementMessage::Greeting(Greeting::default()),
            ManagementMessage::Profile(ProfileInfo::new(ECHO)),
        ] {
            let err = p.message_received(&mgmt(&record), recorder.boxed()).unwrap_err();
            assert!(err.is_protocol_violation());
        }
        assert!(recorder.events().is_empty());
    }
}
