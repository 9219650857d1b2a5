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

//! Channel management records for beepmux.
//!
//! This crate provides the typed records exchanged on a beepmux session's
//! control channel, the reserved reply codes, and the codec abstraction
//! used to carry the records inside ordinary messages.

mod codec;
mod error;
mod messages;

pub use codec::{BincodeCodec, Codec, CodecError, MAX_RECORD_LEN};
pub use error::ControlError;
pub use messages::{
    codes, BeepError, Close, Greeting, ManagementMessage, ProfileInfo, ProfileUri, Start,
    MANAGEMENT_CONTENT_TYPE,
};
