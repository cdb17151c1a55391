// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Subscription lifecycle and notification classification (spec.md §4.4).
//!
//! A Subscribe response's payload is encoded identically to a notification
//! frame (`{1:subscriptionID, 2:changes}`) — the glossary calls the priming
//! report "conceptually equivalent to the first notification" — so priming
//! is decoded with the same [`NotificationFrame::decode_from_response`] used
//! for wire notifications rather than a bespoke parser.

use std::{collections::BTreeMap, time::Duration};

use ciborium::Value;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{
    error::{HarnessError, Result},
    session::Session,
    wire::codec::{NotificationFrame, ResponseFrame, decode_response},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Priming,
    Heartbeat,
    Delta,
}

#[derive(Debug, Clone)]
pub struct DispatchedNotification {
    pub subscription_id: u32,
    pub kind: NotificationKind,
    pub changes: BTreeMap<u32, Value>,
}

#[derive(Debug, Clone)]
pub enum NotificationOutcome {
    Decoded(DispatchedNotification),
    Raw(Vec<u8>),
}

/// Per-subscription classification state: the priming slot consumed by the
/// first `wait_for_notification`, and the baseline attribute count it set.
struct SubscriptionState {
    priming: Option<BTreeMap<u32, Value>>,
    baseline_count: Option<usize>,
}

/// Tracks every active subscription's priming slot and baseline count.
/// Subscription-ID bookkeeping for teardown replay lives on [`Session`]/
/// [`crate::client::pool::Pool`]; this registry only owns classification
/// state.
pub struct SubscriptionRegistry {
    states: DashMap<u32, Mutex<SubscriptionState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    /// Registers a subscription from its successful Subscribe response,
    /// seeding the priming slot and baseline attribute count.
    pub fn register_from_response(&self, resp: &ResponseFrame) -> Result<u32> {
        let frame = NotificationFrame::decode_from_response(resp)?;
        let baseline_count = Some(frame.changes.len());
        self.states.insert(
            frame.subscription_id,
            Mutex::new(SubscriptionState { priming: Some(frame.changes), baseline_count }),
        );
        Ok(frame.subscription_id)
    }

    pub fn unregister(&self, subscription_id: u32) {
        self.states.remove(&subscription_id);
    }

    pub fn is_registered(&self, subscription_id: u32) -> bool {
        self.states.contains_key(&subscription_id)
    }

    /// Waits for the next notification on `subscription_id`. The first call
    /// after registration is satisfied by the priming slot without reading
    /// the wire; every subsequent call blocks on `session`'s framer.
    pub async fn wait_for_notification(
        &self,
        subscription_id: u32,
        session: &Session,
        deadline: Duration,
    ) -> Result<NotificationOutcome> {
        if let Some(primed) = self.take_priming(subscription_id).await? {
            return Ok(NotificationOutcome::Decoded(primed));
        }
        let raw = session.read_frame_with_deadline(deadline).await?;
        self.classify(subscription_id, raw).await
    }

    /// Classifies a notification already pulled from a session's or the
    /// pool's buffered queue (spec.md §4.2's multiplexer quarantine) rather
    /// than read directly off the wire.
    pub async fn classify_from_queue(
        &self,
        subscription_id: u32,
        raw: Vec<u8>,
    ) -> Result<NotificationOutcome> {
        if let Some(primed) = self.take_priming(subscription_id).await? {
            return Ok(NotificationOutcome::Decoded(primed));
        }
        self.classify(subscription_id, raw).await
    }

    async fn take_priming(&self, subscription_id: u32) -> Result<Option<DispatchedNotification>> {
        let entry = self.states.get(&subscription_id).ok_or_else(|| {
            HarnessError::protocol(format!("unknown subscription {subscription_id}"))
        })?;
        let mut state = entry.lock().await;
        Ok(state.priming.take().map(|changes| DispatchedNotification {
            subscription_id,
            kind: NotificationKind::Priming,
            changes,
        }))
    }

    /// Decodes `raw` as a notification and classifies it against the
    /// subscription's baseline attribute count. A decode failure is handed
    /// back as [`NotificationOutcome::Raw`] rather than an error, so a test
    /// can still assert on the bytes.
    async fn classify(&self, subscription_id: u32, raw: Vec<u8>) -> Result<NotificationOutcome> {
        let decoded =
            decode_response(&raw).and_then(|resp| NotificationFrame::decode_from_response(&resp));
        let frame = match decoded {
            Ok(frame) => frame,
            Err(_) => return Ok(NotificationOutcome::Raw(raw)),
        };

        let entry = self.states.get(&subscription_id).ok_or_else(|| {
            HarnessError::protocol(format!("unknown subscription {subscription_id}"))
        })?;
        let mut state = entry.lock().await;
        let count = frame.changes.len();
        let kind = match state.baseline_count {
            None => {
                state.baseline_count = Some(count);
                NotificationKind::Priming
            },
            Some(baseline) if count >= baseline => NotificationKind::Heartbeat,
            Some(_) => NotificationKind::Delta,
        };
        Ok(NotificationOutcome::Decoded(DispatchedNotification {
            subscription_id: frame.subscription_id,
            kind,
            changes: frame.changes,
        }))
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
