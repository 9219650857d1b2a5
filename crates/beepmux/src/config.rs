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

//! Channel management configuration.

use crate::Role;
use beepmux_control::ProfileUri;

/// Configuration for the channel management side of a session.
#[derive(Debug, Clone)]
pub struct Config {
    /// Our role in the session.
    ///
    /// Fixes which channel-number parity the peer must use when it opens
    /// channels.
    pub role: Role,

    /// Profiles advertised in the local greeting, in preference order.
    pub profiles: Vec<ProfileUri>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            profiles: Vec::new(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session role.
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Adds a profile to the greeting.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<ProfileUri>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a profile URI is empty or listed twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, profile) in self.profiles.iter().enumerate() {
            if profile.as_str().trim().is_empty() {
                return Err(ConfigError::EmptyProfile);
            }
            if self.profiles[..i].contains(profile) {
                return Err(ConfigError::DuplicateProfile(profile.clone()));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A profile URI is empty.
    #[error("profile URIs must not be empty")]
    EmptyProfile,

    /// The same profile is advertised twice.
    #[error("profile advertised twice: {0}")]
    DuplicateProfile(ProfileUri),
}
