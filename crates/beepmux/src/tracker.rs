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

//! Request/reply correlation bookkeeping.
//!
//! Holds:
//! - The per-channel counters of outstanding requests in both directions
//! - Message number generation

use crate::error::CorrelationKind;
use crate::MessageNumber;
use std::sync::atomic::{AtomicU32, Ordering};

/// Counts the request/reply correlations still open on a channel.
///
/// Pure bookkeeping; the owner serializes access.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplyCorrelationTracker {
    /// Requests we sent that have not yet received a terminal reply.
    outstanding_replies: u32,
    /// Requests we received that we have not yet answered terminally.
    outstanding_responses: u32,
}

impl ReplyCorrelationTracker {
    /// Creates a tracker with nothing outstanding.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outstanding_replies: 0,
            outstanding_responses: 0,
        }
    }

    /// Records a request sent by this side.
    pub fn reply_expected(&mut self) {
        self.outstanding_replies += 1;
    }

    /// Records a terminal reply received for one of our requests.
    ///
    /// # Errors
    ///
    /// Returns the counter kind if no reply was outstanding; the counter
    /// stays at zero.
    pub fn reply_completed(&mut self) -> Result<(), CorrelationKind> {
        self.outstanding_replies = self
            .outstanding_replies
            .checked_sub(1)
            .ok_or(CorrelationKind::Reply)?;
        Ok(())
    }

    /// Records a request received from the peer.
    pub fn response_expected(&mut self) {
        self.outstanding_responses += 1;
    }

    /// Records a terminal response sent for one of the peer's requests.
    ///
    /// # Errors
    ///
    /// Returns the counter kind if no response was outstanding; the
    /// counter stays at zero.
    pub fn response_completed(&mut self) -> Result<(), CorrelationKind> {
        self.outstanding_responses = self
            .outstanding_responses
            .checked_sub(1)
            .ok_or(CorrelationKind::Response)?;
        Ok(())
    }

    /// Number of sent requests awaiting a terminal reply.
    #[must_use]
    pub const fn outstanding_replies(&self) -> u32 {
        self.outstanding_replies
    }

    /// Number of received requests awaiting a terminal response.
    #[must_use]
    pub const fn outstanding_responses(&self) -> u32 {
        self.outstanding_responses
    }

    /// Returns true if nothing is outstanding in either direction.
    #[must_use]
    pub const fn is_quiescent(&self) -> bool {
        self.outstanding_replies == 0 && self.outstanding_responses == 0
    }
}

/// Largest message number allowed on the wire.
pub const MAX_MESSAGE_NUMBER: MessageNumber = 2_147_483_647;

/// Message number source, starting at 1.
///
/// After [`MAX_MESSAGE_NUMBER`] the sequence wraps back to 1; a number is
/// only reused once its request has long been answered.
#[derive(Debug)]
pub struct MessageNumberSequence {
    next: AtomicU32,
}

impl Default for MessageNumberSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageNumberSequence {
    /// Creates a sequence whose first number is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Returns the next message number.
    pub fn next_number(&self) -> MessageNumber {
        let step = |n: MessageNumber| Some(if n >= MAX_MESSAGE_NUMBER { 1 } else { n + 1 });
        match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(n) | Err(n) => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_quiescent() {
        let tracker = ReplyCorrelationTracker::new();
        assert!(tracker.is_quiescent());
        assert_eq!(tracker.outstanding_replies(), 0);
        assert_eq!(tracker.outstanding_responses(), 0);
    }

    #[test]
    fn counters_are_independent() {
        let mut tracker = ReplyCorrelationTracker::new();
        tracker.reply_expected();
        tracker.reply_expected();
        tracker.response_expected();

        assert_eq!(tracker.outstanding_replies(), 2);
        assert_eq!(tracker.outstanding_responses(), 1);

        tracker.response_completed().unwrap();
        assert!(!tracker.is_quiescent());

        tracker.reply_completed().unwrap();
        tracker.reply_completed().unwrap();
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn underflow_is_reported_and_clamped() {
        let mut tracker = ReplyCorrelationTracker::new();
        assert_eq!(tracker.reply_completed(), Err(CorrelationKind::Reply));
        assert_eq!(tracker.response_completed(), Err(CorrelationKind::Response));
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn sequence_starts_at_one() {
        let seq = MessageNumberSequence::new();
        assert_eq!(seq.next_number(), 1);
        assert_eq!(seq.next_number(), 2);
        assert_eq!(seq.next_number(), 3);
    }

    #[test]
    fn sequence_wraps_within_wire_range() {
        let seq = MessageNumberSequence {
            next: AtomicU32::new(MAX_MESSAGE_NUMBER - 1),
        };
        assert_eq!(seq.next_number(), MAX_MESSAGE_NUMBER - 1);
        assert_eq!(seq.next_number(), MAX_MESSAGE_NUMBER);
        assert_eq!(seq.next_number(), 1);
        assert_eq!(seq.next_number(), 2);
    }
}
