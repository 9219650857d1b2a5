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

//! Message payloads and reply outcomes.

use bytes::Bytes;

/// Content type used when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// An opaque message payload as exchanged on a channel.
///
/// Framing and MIME header encoding belong to the transport; the core
/// only needs the content type and the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    content_type: String,
    body: Bytes,
}

impl Message {
    /// Creates a message with the given content type and body.
    #[must_use]
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// Creates a message with the default content type.
    #[must_use]
    pub fn from_bytes(body: impl Into<Bytes>) -> Self {
        Self::new(DEFAULT_CONTENT_TYPE, body)
    }

    /// Returns the content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consumes the message, returning the body.
    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// The reply to a request, as seen by either side of the exchange.
///
/// `Ans` is a partial answer and keeps the correlation open; the other
/// three terminate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// One of possibly many answers.
    Ans(Message),
    /// Empty terminal acknowledgement, ending a series of answers.
    Nul,
    /// Terminal failure.
    Err(Message),
    /// Terminal success.
    Rpy(Message),
}

impl ReplyOutcome {
    /// Returns true if this reply ends the correlation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ans(_))
    }

    /// Returns the BEEP keyword for the reply, for logging.
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::Ans(_) => "ANS",
            Self::Nul => "NUL",
            Self::Err(_) => "ERR",
            Self::Rpy(_) => "RPY",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ans_keeps_correlation_open() {
        let body = Message::from_bytes("x");
        assert!(!ReplyOutcome::Ans(body.clone()).is_terminal());
        assert!(ReplyOutcome::Nul.is_terminal());
        assert!(ReplyOutcome::Err(body.clone()).is_terminal());
        assert!(ReplyOutcome::Rpy(body).is_terminal());
    }

    #[test]
    fn message_accessors() {
        let message = Message::new("text/plain", "hello");
        assert_eq!(message.content_type(), "text/plain");
        assert_eq!(message.body().as_ref(), b"hello");
        assert_eq!(message.into_body(), Bytes::from_static(b"hello"));

        assert_eq!(
            Message::from_bytes(vec![1, 2]).content_type(),
            DEFAULT_CONTENT_TYPE
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(ReplyOutcome::Nul.keyword(), "NUL");
        assert_eq!(ReplyOutcome::Rpy(Message::from_bytes("")).keyword(), "RPY");
    }
}
