// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One TLS (or, for the flood probe, raw) endpoint: transport handle,
//! framer, lifecycle state, per-session notification buffer, and
//! subscription list (spec.md §3, §4.7).

use std::{
    collections::VecDeque,
    sync::{
        Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use once_cell::sync::OnceCell;
use tokio::sync::Mutex;

use crate::{
    client::pool::Pool,
    error::{HarnessError, Result},
    transport::stream::Transport,
    wire::{
        codec::{ControlMessage, encode_control},
        framer::Framer,
    },
};

/// Session lifecycle. Transitions are monotonic except `Disconnected`,
/// which is terminal for the session object (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Dialed,
    TlsConnected,
    PaseVerified,
    Operational,
    Disconnected,
}

/// A polymorphic endpoint over a TCP or TLS transport.
///
/// Invariant: if `framer` is populated then exactly one of raw/TLS backs it
/// (enforced by [`Transport`] being an enum, not a pair of options). A
/// session in [`ConnectionState::Disconnected`] must not be selected for
/// I/O; callers check [`Session::is_usable`] before issuing a read/write.
pub struct Session {
    framer: Mutex<Option<Framer<Transport>>>,
    state: Mutex<ConnectionState>,
    notifications: Mutex<VecDeque<Vec<u8>>>,
    subscriptions: Mutex<Vec<u32>>,
    operational: AtomicBool,
    owner: OnceCell<Weak<Pool>>,
}

impl Session {
    pub fn new(transport: Transport, state: ConnectionState) -> Self {
        Self {
            framer: Mutex::new(Some(Framer::new(transport))),
            state: Mutex::new(state),
            notifications: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            operational: AtomicBool::new(false),
            owner: OnceCell::new(),
        }
    }

    /// Binds the back-reference to the owning pool. Idempotent-once: a
    /// second call is a no-op, matching the teacher's `attach_self` /
    /// `OnceCell` pattern for circular owner references.
    pub fn attach_owner(&self, pool: Weak<Pool>) {
        let _ = self.owner.set(pool);
    }

    pub fn owner(&self) -> Option<Weak<Pool>> {
        self.owner.get().cloned()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock().await = new_state;
    }

    pub async fn is_usable(&self) -> bool {
        *self.state.lock().await != ConnectionState::Disconnected
    }

    pub fn mark_operational(&self, value: bool) {
        self.operational.store(value, Ordering::SeqCst);
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    /// Writes one frame on this session's transport. Callers MUST serialize
    /// access to a single session themselves (spec.md §5: "the pool itself
    /// is NOT internally locked").
    pub async fn write_frame(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.framer.lock().await;
        let framer = guard
            .as_mut()
            .ok_or_else(|| HarnessError::infra("session has no active framer"))?;
        framer.write_frame(payload).await
    }

    pub async fn read_frame(&self) -> Result<Vec<u8>> {
        let mut guard = self.framer.lock().await;
        let framer = guard
            .as_mut()
            .ok_or_else(|| HarnessError::infra("session has no active framer"))?;
        framer.read_frame().await
    }

    pub async fn read_frame_with_deadline(
        &self,
        deadline: std::time::Duration,
    ) -> Result<Vec<u8>> {
        let mut guard = self.framer.lock().await;
        let framer = guard
            .as_mut()
            .ok_or_else(|| HarnessError::infra("session has no active framer"))?;
        framer.read_frame_with_deadline(deadline).await
    }

    /// Transitions to `Disconnected`, drops the framer (closing the
    /// underlying handle), and empties the notification queue (spec.md §3:
    /// "closure releases underlying handles and empties the notification
    /// queue").
    pub async fn disconnect(&self) {
        *self.state.lock().await = ConnectionState::Disconnected;
        self.framer.lock().await.take();
        self.notifications.lock().await.clear();
        self.operational.store(false, Ordering::SeqCst);
    }

    /// Graceful close (spec.md §6): sends `ControlClose`, then waits up to
    /// `ack_deadline` for the peer's acknowledgement. Any reply or read
    /// error (EOF included) within that window counts as acknowledgement —
    /// `close_ack` is optional, so a write failure or timeout is not
    /// reported back to the caller, only logged; either way the session is
    /// torn down exactly as [`Session::disconnect`] would.
    pub async fn close_with_ack(&self, ack_deadline: Duration) {
        let close = match encode_control(&ControlMessage::Close) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode ControlClose, closing without ack");
                self.disconnect().await;
                return;
            },
        };
        if let Err(e) = self.write_frame(&close).await {
            tracing::debug!(error = %e, "ControlClose send failed, closing anyway");
            self.disconnect().await;
            return;
        }
        match self.read_frame_with_deadline(ack_deadline).await {
            Ok(_) => tracing::debug!("close_ack received"),
            Err(e) => tracing::debug!(error = %e, "no close_ack within deadline, treating as acknowledged"),
        }
        self.disconnect().await;
    }

    pub async fn push_notification(&self, raw: Vec<u8>) {
        self.notifications.lock().await.push_back(raw);
    }

    pub async fn pop_notification(&self) -> Option<Vec<u8>> {
        self.notifications.lock().await.pop_front()
    }

    pub async fn notification_count(&self) -> usize {
        self.notifications.lock().await.len()
    }

    pub async fn drain_notifications(&self) -> Vec<Vec<u8>> {
        self.notifications.lock().await.drain(..).collect()
    }

    pub async fn track_subscription(&self, subscription_id: u32) {
        self.subscriptions.lock().await.push(subscription_id);
    }

    pub async fn untrack_subscription(&self, subscription_id: u32) {
        self.subscriptions.lock().await.retain(|id| *id != subscription_id);
    }

    pub async fn subscription_ids(&self) -> Vec<u32> {
        self.subscriptions.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn dummy_session() -> Session {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, (server, _)) =
            tokio::try_join!(tokio::net::TcpStream::connect(addr), listener.accept())
                .expect("loopback pair");
        drop(server);
        Session::new(Transport::Raw(client), ConnectionState::Dialed)
    }

    async fn loopback_pair() -> (Session, tokio::net::TcpStream) {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, (server, _)) =
            tokio::try_join!(tokio::net::TcpStream::connect(addr), listener.accept())
                .expect("loopback pair");
        (Session::new(Transport::Raw(client), ConnectionState::TlsConnected), server)
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_clears_queue() {
        let session = dummy_session().await;
        session.push_notification(b"note".to_vec()).await;
        session.disconnect().await;
        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(!session.is_usable().await);
        assert_eq!(session.notification_count().await, 0);
    }

    #[tokio::test]
    async fn close_with_ack_terminates_after_peer_replies() {
        let (session, server) = loopback_pair().await;
        let mut server_framer = crate::wire::framer::Framer::new(Transport::Raw(server));

        let responder = tokio::spawn(async move {
            let frame = server_framer.read_frame().await.expect("read ControlClose");
            let msg = crate::wire::codec::decode_control(&frame).expect("decode");
            assert!(matches!(msg, ControlMessage::Close));
            server_framer.write_frame(b"ack").await.expect("write ack");
        });

        session.close_with_ack(Duration::from_secs(2)).await;
        responder.await.expect("responder task");

        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(!session.is_usable().await);
    }

    #[tokio::test]
    async fn close_with_ack_terminates_on_peer_eof() {
        let (session, server) = loopback_pair().await;
        drop(server);

        session.close_with_ack(Duration::from_millis(200)).await;

        assert_eq!(session.state().await, ConnectionState::Disconnected);
        assert!(!session.is_usable().await);
    }

    #[tokio::test]
    async fn notifications_fifo_order() {
        let session = dummy_session().await;
        session.push_notification(b"first".to_vec()).await;
        session.push_notification(b"second".to_vec()).await;
        assert_eq!(session.pop_notification().await, Some(b"first".to_vec()));
        assert_eq!(session.pop_notification().await, Some(b"second".to_vec()));
        assert_eq!(session.pop_notification().await, None);
    }

    #[tokio::test]
    async fn subscription_tracking_round_trips() {
        let session = dummy_session().await;
        session.track_subscription(5).await;
        session.track_subscription(9).await;
        session.untrack_subscription(5).await;
        assert_eq!(session.subscription_ids().await, vec![9]);
    }
}
