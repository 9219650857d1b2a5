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

//! Channel management message definitions.
//!
//! This module defines the records exchanged on the control channel
//! (channel 0) of a beepmux session: the greeting, channel start and
//! close requests, and their replies.

use crate::ControlError;
use serde::{Deserialize, Serialize};

/// Content type carried by every channel management message.
pub const MANAGEMENT_CONTENT_TYPE: &str = "application/beep+bincode";

/// Reply codes used in `error` and `close` records.
///
/// These follow the three-digit reply codes of BEEP (RFC 3080, section 8).
pub mod codes {
    /// Success. Carried by every `close` request.
    pub const SUCCESS: u16 = 200;
    /// Service not available.
    pub const SERVICE_NOT_AVAILABLE: u16 = 421;
    /// Requested action not taken (e.g., lock already in use).
    pub const ACTION_NOT_TAKEN: u16 = 450;
    /// General syntax error (e.g., poorly-formed XML).
    pub const GENERAL_SYNTAX_ERROR: u16 = 500;
    /// Syntax error in parameters; used for illegal channel number parity.
    pub const ILLEGAL_PARITY: u16 = 501;
    /// Parameter not implemented.
    pub const PARAMETER_NOT_IMPLEMENTED: u16 = 504;
    /// Authentication failed.
    pub const AUTHENTICATION_FAILED: u16 = 535;
    /// Requested action not taken; used when a close is declined because
    /// work is still outstanding.
    pub const STILL_WORKING: u16 = 550;
    /// Transaction failed (e.g., policy violation).
    pub const TRANSACTION_FAILED: u16 = 554;
}

/// Identifies a profile by URI.
///
/// Profiles name the application protocol spoken on a channel, such as
/// `http://iana.org/beep/TLS` or `http://example.org/beep/echo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileUri(pub String);

impl ProfileUri {
    /// Creates a new profile identifier.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Returns the profile URI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProfileUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProfileUri {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ProfileUri {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A profile together with an optional piggy-backed initialization payload.
///
/// Used both for the candidates of a `start` request and for the accepted
/// profile in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    /// The profile identifier.
    pub uri: ProfileUri,
    /// Optional initialization payload exchanged with the start.
    pub content: Option<String>,
}

impl ProfileInfo {
    /// Creates a profile entry without initialization payload.
    #[must_use]
    pub fn new(uri: impl Into<ProfileUri>) -> Self {
        Self {
            uri: uri.into(),
            content: None,
        }
    }

    /// Attaches an initialization payload.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Capability greeting, exchanged once per session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Greeting {
    /// Supported profiles, in advertisement order.
    pub profiles: Vec<ProfileUri>,
}

impl Greeting {
    /// Creates a greeting advertising the given profiles.
    #[must_use]
    pub fn new(profiles: impl IntoIterator<Item = ProfileUri>) -> Self {
        Self {
            profiles: profiles.into_iter().collect(),
        }
    }

    /// Returns true if the greeting advertises the profile.
    #[must_use]
    pub fn supports(&self, profile: &ProfileUri) -> bool {
        self.profiles.contains(profile)
    }

    /// Checks that the advertised profiles form a set.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::DuplicateProfile`] if a profile is listed twice.
    pub fn validate(&self) -> Result<(), ControlError> {
        for (i, profile) in self.profiles.iter().enumerate() {
            if self.profiles[..i].contains(profile) {
                return Err(ControlError::DuplicateProfile(profile.clone()));
            }
        }
        Ok(())
    }
}

/// Request to open a new channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Start {
    /// Number of the channel to open.
    pub channel: i32,
    /// Candidate profiles, in preference order.
    pub profiles: Vec<ProfileInfo>,
}

impl Start {
    /// Creates a start request for the given channel and candidates.
    #[must_use]
    pub fn new(channel: i32, profiles: Vec<ProfileInfo>) -> Self {
        Self { channel, profiles }
    }
}

/// Request to close a channel, or the whole session when `channel` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    /// Number of the channel to close.
    pub channel: i32,
    /// Reply code attached to the close.
    pub code: u16,
}

impl Close {
    /// Creates a close request carrying the success code.
    #[must_use]
    pub const fn new(channel: i32) -> Self {
        Self {
            channel,
            code: codes::SUCCESS,
        }
    }
}

/// Error reply: a reply code with a human-readable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeepError {
    /// Three-digit reply code.
    pub code: u16,
    /// Diagnostic text.
    pub diagnostic: String,
}

impl BeepError {
    /// Creates an error record.
    #[must_use]
    pub fn new(code: u16, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            diagnostic: diagnostic.into(),
        }
    }
}

impl std::fmt::Display for BeepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.diagnostic)
    }
}

/// All records that can be exchanged on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementMessage {
    /// Capability greeting.
    Greeting(Greeting),
    /// Channel start request.
    Start(Start),
    /// Accepted profile, in reply to a start request.
    Profile(ProfileInfo),
    /// Channel or session close request.
    Close(Close),
    /// Positive reply to a close request.
    Ok,
    /// Negative reply to any request.
    Error(BeepError),
}

impl ManagementMessage {
    /// Returns a short name for the record, for logging and diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Greeting(_) => "greeting",
            Self::Start(_) => "start",
            Self::Profile(_) => "profile",
            Self::Close(_) => "close",
            Self::Ok => "ok",
            Self::Error(_) => "error",
        }
    }

    /// Extracts a greeting, checking that its profiles form a set.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not a valid greeting.
    pub fn into_greeting(self) -> Result<Greeting, ControlError> {
        match self {
            Self::Greeting(greeting) => {
                greeting.validate()?;
                Ok(greeting)
            }
            other => Err(ControlError::unexpected("greeting", &other)),
        }
    }

    /// Extracts an error record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not an `error`.
    pub fn into_error(self) -> Result<BeepError, ControlError> {
        match self {
            Self::Error(error) => Ok(error),
            other => Err(ControlError::unexpected("error", &other)),
        }
    }

    /// Extracts the accepted profile of a start reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not a `profile`.
    pub fn into_profile(self) -> Result<ProfileInfo, ControlError> {
        match self {
            Self::Profile(profile) => Ok(profile),
            other => Err(ControlError::unexpected("profile", &other)),
        }
    }

    /// Checks that the record is an `ok`.
    ///
    /// # Errors
    ///
    /// Returns an error for any other record.
    pub fn into_ok(self) -> Result<(), ControlError> {
        match self {
            Self::Ok => Ok(()),
            other => Err(ControlError::unexpected("ok", &other)),
        }
    }
}
