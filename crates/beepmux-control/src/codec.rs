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

//! Wire encoding of management records.
//!
//! A record travels as the body of an ordinary channel 0 message, tagged
//! with [`MANAGEMENT_CONTENT_TYPE`](crate::MANAGEMENT_CONTENT_TYPE). Bodies
//! come from the peer, so decoding is bounded and rejects trailing bytes.

use crate::ManagementMessage;
use bincode::Options;
use thiserror::Error;

/// Largest encoded management record accepted in either direction.
pub const MAX_RECORD_LEN: u64 = 64 * 1024;

/// Errors that can occur while encoding or decoding a record.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record could not be encoded.
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// The body is not a well-formed record.
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

/// Encodes management records to message bodies and back.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a record as a message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exceeds [`MAX_RECORD_LEN`].
    fn encode_message(&self, message: &ManagementMessage) -> Result<Vec<u8>, CodecError>;

    /// Decodes a message body received on the control channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is malformed, oversized or followed
    /// by trailing bytes.
    fn decode_message(&self, data: &[u8]) -> Result<ManagementMessage, CodecError>;
}

/// Fixed-width bincode, limited to [`MAX_RECORD_LEN`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    /// Creates a new bincode codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn options() -> impl Options {
    bincode::options()
        .with_fixint_encoding()
        .with_limit(MAX_RECORD_LEN)
}

impl Codec for BincodeCodec {
    fn encode_message(&self, message: &ManagementMessage) -> Result<Vec<u8>, CodecError> {
        options()
            .serialize(message)
            .map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn decode_message(&self, data: &[u8]) -> Result<ManagementMessage, CodecError> {
        options()
            .deserialize(data)
            .map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}
