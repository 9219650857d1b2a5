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

//! Error types for the channel management records.

use crate::{ManagementMessage, ProfileUri};
use thiserror::Error;

/// Errors that can occur while interpreting channel management records.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A record of a different kind was expected.
    #[error("unexpected {found} record, expected {expected}")]
    UnexpectedMessage {
        /// The record kind the exchange requires.
        expected: &'static str,
        /// The record kind that was received.
        found: &'static str,
    },

    /// A greeting lists the same profile more than once.
    #[error("duplicate profile in greeting: {0}")]
    DuplicateProfile(ProfileUri),

    /// A start request lists no candidate profiles.
    #[error("start request lists no profiles")]
    EmptyProfileList,

    /// Codec error during serialization or deserialization.
    #[error("codec error: {0}")]
    Codec(#[from] crate::CodecError),
}

impl ControlError {
    /// Creates an unexpected-record error for the given received record.
    #[must_use]
    pub const fn unexpected(expected: &'static str, found: &ManagementMessage) -> Self {
        Self::UnexpectedMessage {
            expected,
            found: found.kind(),
        }
    }
}
