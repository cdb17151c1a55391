// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection pool: owns the main session plus up to 5 per-zone sessions,
//! hands out message IDs, and runs the multiplexed exchange (spec.md §4.2,
//! the hardest algorithm in this crate).
//!
//! Modeled on the teacher's `pool_sessions.rs` `Pool`/`execute_with` shape
//! (`DashMap`-keyed sessions, a `self_weak: OnceCell<Weak<Pool>>` for
//! attaching the owner back-reference, closure-injected per-call state),
//! generalized from iSCSI TSIH/CID keys to MASH zone keys and from a
//! single-ITT correlation model to the notification-quarantine /
//! orphan-discard read loop spec.md requires.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Weak,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    cfg::config::{LimitsConfig, TimeoutConfig},
    error::{HarnessError, Result},
    session::{ConnectionState, Session},
    wire::codec::{ResponseFrame, decode_response},
};

pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;
pub type CloseHook = Arc<dyn Fn(&str, Arc<Session>) + Send + Sync>;

/// Owns the main session plus N ≤ 5 secondary per-zone sessions (spec.md
/// §3). Deliberately not internally locked beyond what's listed here
/// (spec.md §5): callers serialize access to a single session themselves.
pub struct Pool {
    main: RwLock<Option<Arc<Session>>>,
    zones: DashMap<String, Arc<Session>>,
    zone_ids: DashMap<String, String>,
    next_msg_id: AtomicU32,
    subscriptions: Mutex<Vec<u32>>,
    pool_notifications: Mutex<VecDeque<Vec<u8>>>,
    debug_sink: RwLock<Option<DebugSink>>,
    close_hook: RwLock<Option<CloseHook>>,
    self_weak: OnceCell<Weak<Pool>>,
    timeouts: TimeoutConfig,
    limits: LimitsConfig,
}

impl Pool {
    /// Builds a pool using [`TimeoutConfig::default`]/[`LimitsConfig::default`]
    /// (spec.md §5's own defaults). Prefer [`Pool::with_config`] when a
    /// suite has loaded a [`crate::cfg::config::Config`] and wants its
    /// `timeouts`/`limits` block to actually govern pool behavior.
    pub fn new() -> Arc<Self> {
        Self::with_config(TimeoutConfig::default(), LimitsConfig::default())
    }

    pub fn with_config(timeouts: TimeoutConfig, limits: LimitsConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            main: RwLock::new(None),
            zones: DashMap::new(),
            zone_ids: DashMap::new(),
            next_msg_id: AtomicU32::new(0),
            subscriptions: Mutex::new(Vec::new()),
            pool_notifications: Mutex::new(VecDeque::new()),
            debug_sink: RwLock::new(None),
            close_hook: RwLock::new(None),
            self_weak: OnceCell::new(),
            timeouts,
            limits,
        });
        let weak = Arc::downgrade(&pool);
        let _ = pool.self_weak.set(weak);
        pool
    }

    fn self_arc(&self) -> Option<Arc<Pool>> {
        self.self_weak.get().and_then(Weak::upgrade)
    }

    pub async fn set_debug_sink(&self, sink: DebugSink) {
        *self.debug_sink.write().await = Some(sink);
    }

    pub async fn set_close_hook(&self, hook: CloseHook) {
        *self.close_hook.write().await = Some(hook);
    }

    fn debug_log(&self, msg: &str) {
        debug!("{msg}");
    }

    /// Fetch-and-add message-ID generator: returns counter+1, wrapping at
    /// 32 bits (spec.md §3, §8 property 1).
    pub fn next_message_id(&self) -> u32 {
        self.next_msg_id.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub async fn set_main_session(&self, session: Arc<Session>) {
        if let Some(pool) = self.self_arc() {
            session.attach_owner(Arc::downgrade(&pool));
        }
        *self.main.write().await = Some(session);
    }

    pub async fn main_session(&self) -> Result<Arc<Session>> {
        self.main
            .read()
            .await
            .clone()
            .ok_or_else(|| HarnessError::infra("no main session attached"))
    }

    pub async fn has_main_session(&self) -> bool {
        self.main.read().await.is_some()
    }

    /// Attaches a per-zone session. Enforces the 5-session cap (spec.md §3).
    pub async fn add_zone_session(
        &self,
        zone_key: impl Into<String>,
        zone_id: impl Into<String>,
        session: Arc<Session>,
    ) -> Result<()> {
        let zone_key = zone_key.into();
        if self.zones.len() >= self.limits.max_zone_sessions && !self.zones.contains_key(&zone_key)
        {
            return Err(HarnessError::protocol("MAX_CONNECTIONS_EXCEEDED"));
        }
        if let Some(pool) = self.self_arc() {
            session.attach_owner(Arc::downgrade(&pool));
        }
        self.zone_ids.insert(zone_key.clone(), zone_id.into());
        self.zones.insert(zone_key, session);
        Ok(())
    }

    pub fn zone_session(&self, zone_key: &str) -> Option<Arc<Session>> {
        self.zones.get(zone_key).map(|e| e.value().clone())
    }

    pub fn zone_id(&self, zone_key: &str) -> Option<String> {
        self.zone_ids.get(zone_key).map(|e| e.value().clone())
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn zone_keys(&self) -> Vec<String> {
        self.zones.iter().map(|e| e.key().clone()).collect()
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

    pub async fn push_pool_notification(&self, raw: Vec<u8>) {
        self.pool_notifications.lock().await.push_back(raw);
    }

    pub async fn pop_pool_notification(&self) -> Option<Vec<u8>> {
        self.pool_notifications.lock().await.pop_front()
    }

    pub async fn pool_notification_count(&self) -> usize {
        self.pool_notifications.lock().await.len()
    }

    pub async fn drain_pool_notifications(&self) -> Vec<Vec<u8>> {
        self.pool_notifications.lock().await.drain(..).collect()
    }

    fn effective_deadline(&self, ctx_deadline: Option<Duration>) -> Duration {
        match ctx_deadline {
            Some(d) if d < self.timeouts.read_default => d,
            _ => self.timeouts.read_default,
        }
    }

    /// `SendRequest` (spec.md §4.2): writes on the main session, then reads
    /// until the expected message ID is seen, quarantining notifications
    /// into the pool queue and discarding orphaned stale responses, bounded
    /// to `limits.multiplex_iteration_cap` iterations.
    pub async fn send_request(
        &self,
        payload: &[u8],
        expected_msg_id: u32,
        ctx_deadline: Option<Duration>,
    ) -> Result<ResponseFrame> {
        let main = self.main_session().await?;
        if let Err(e) = main.write_frame(payload).await {
            main.disconnect().await;
            return Err(e);
        }

        let deadline = self.effective_deadline(ctx_deadline);
        for _ in 0..self.limits.multiplex_iteration_cap {
            let raw = match main.read_frame_with_deadline(deadline).await {
                Ok(raw) => raw,
                Err(e) => {
                    main.disconnect().await;
                    return Err(e);
                },
            };
            let resp = decode_response(&raw)?;
            if resp.is_notification() {
                self.push_pool_notification(raw).await;
                continue;
            }
            if resp.message_id != expected_msg_id {
                warn!(
                    got = resp.message_id,
                    expected = expected_msg_id,
                    "discarding orphaned response"
                );
                continue;
            }
            return Ok(resp);
        }
        Err(HarnessError::protocol("too-many-interleaved-frames"))
    }

    /// Zone-scoped exchange (spec.md §4.2): same shape, but no
    /// orphan-discard (a zone stream serves one logical caller, so a
    /// mismatched message ID is a protocol error, not noise to skip past)
    /// and notifications land on the session's own queue, not the pool's.
    pub async fn send_zone_request(
        &self,
        zone_key: &str,
        payload: &[u8],
        expected_msg_id: u32,
        ctx_deadline: Option<Duration>,
    ) -> Result<ResponseFrame> {
        let session = self
            .zone_session(zone_key)
            .ok_or_else(|| HarnessError::infra(format!("no session for zone {zone_key}")))?;
        if let Err(e) = session.write_frame(payload).await {
            session.disconnect().await;
            return Err(e);
        }

        let deadline = self.effective_deadline(ctx_deadline);
        for _ in 0..self.limits.multiplex_iteration_cap {
            let raw = match session.read_frame_with_deadline(deadline).await {
                Ok(raw) => raw,
                Err(e) => {
                    session.disconnect().await;
                    return Err(e);
                },
            };
            let resp = decode_response(&raw)?;
            if resp.is_notification() {
                session.push_notification(raw).await;
                continue;
            }
            if resp.message_id != expected_msg_id {
                return Err(HarnessError::protocol(format!(
                    "zone {zone_key}: unexpected response id {} (expected {expected_msg_id})",
                    resp.message_id
                )));
            }
            return Ok(resp);
        }
        Err(HarnessError::protocol("too-many-interleaved-frames"))
    }

    /// Unsubscribe exchange (spec.md §4.2): 2 s deadline, 20-iteration
    /// drain bound, interleaved notifications silently consumed (dropped,
    /// not queued — this is a teardown path).
    pub async fn send_unsubscribe(
        &self,
        payload: &[u8],
        expected_msg_id: u32,
    ) -> Result<ResponseFrame> {
        let main = self.main_session().await?;
        if let Err(e) = main.write_frame(payload).await {
            main.disconnect().await;
            return Err(e);
        }

        for _ in 0..self.limits.unsubscribe_drain_cap {
            let raw = match main.read_frame_with_deadline(self.timeouts.unsubscribe_drain).await {
                Ok(raw) => raw,
                Err(e) => {
                    main.disconnect().await;
                    return Err(e);
                },
            };
            let resp = decode_response(&raw)?;
            if resp.is_notification() {
                continue;
            }
            if resp.message_id != expected_msg_id {
                continue;
            }
            return Ok(resp);
        }
        Err(HarnessError::protocol("too-many-interleaved-frames"))
    }

    /// `CloseZonesExcept` (spec.md §4.2): tears down every zone session
    /// except `keep_key`, invoking the close hook (if any) before closing
    /// each handle. Returns the wall-clock time of the last real close, or
    /// `UNIX_EPOCH` ("the zero time") if none occurred.
    pub async fn close_zones_except(&self, keep_key: Option<&str>) -> SystemTime {
        let mut last_close = SystemTime::UNIX_EPOCH;
        let victims: Vec<String> = self
            .zones
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| keep_key != Some(k.as_str()))
            .collect();

        let hook = self.close_hook.read().await.clone();
        for key in victims {
            let Some((_, session)) = self.zones.remove(&key) else {
                continue;
            };
            let zone_id = self.zone_ids.remove(&key).map(|(_, v)| v).unwrap_or_default();
            if let Some(hook) = &hook {
                hook(&zone_id, session.clone());
            }
            session.disconnect().await;
            last_close = SystemTime::now();
            self.debug_log(&format!("closed zone {key} ({zone_id})"));
        }
        last_close
    }

    pub async fn close_all_zones(&self) -> SystemTime {
        self.close_zones_except(None).await
    }

    pub async fn disconnect_main(&self) {
        if let Some(main) = self.main.write().await.take() {
            main.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::wire::codec::{RequestFrame, StatusCode, encode_response};

    async fn loopback() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (client, (server, _)) =
            tokio::try_join!(TcpStream::connect(addr), listener.accept()).expect("pair");
        (client, server)
    }

    #[tokio::test]
    async fn message_ids_increase_strictly() {
        let pool = Pool::new();
        let first = pool.next_message_id();
        let second = pool.next_message_id();
        let third = pool.next_message_id();
        assert_eq!((first, second, third), (1, 2, 3));
    }

    #[tokio::test]
    async fn message_id_wraps_at_u32_max_instead_of_panicking() {
        let pool = Pool::new();
        pool.next_msg_id.store(u32::MAX, Ordering::SeqCst);
        let wrapped = pool.next_message_id();
        assert_eq!(wrapped, 0);
        assert_eq!(pool.next_message_id(), 1);
    }

    #[tokio::test]
    async fn orphan_then_match_discards_stale_response() {
        let (client, server) = loopback().await;
        let pool = Pool::new();
        pool.set_main_session(Arc::new(Session::new(
            crate::transport::stream::Transport::Raw(client),
            ConnectionState::Operational,
        )))
        .await;

        let mut server_framer =
            crate::wire::framer::Framer::new(crate::transport::stream::Transport::Raw(server));
        let stale =
            encode_response(&ResponseFrame { message_id: 3, status: StatusCode::SUCCESS, payload: None })
                .expect("encode");
        let matching =
            encode_response(&ResponseFrame { message_id: 9, status: StatusCode::SUCCESS, payload: None })
                .expect("encode");

        let writer = tokio::spawn(async move {
            server_framer.write_frame(&stale).await.expect("write stale");
            server_framer.write_frame(&matching).await.expect("write match");
        });

        let req = crate::wire::codec::encode_request(&RequestFrame {
            message_id: 9,
            operation: crate::wire::codec::Operation::Read,
            endpoint_id: 0,
            feature_id: 1,
            payload: None,
        })
        .expect("encode request");

        let resp = pool.send_request(&req, 9, None).await.expect("send_request");
        assert_eq!(resp.message_id, 9);
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn iteration_cap_fails_without_reading_an_eleventh_frame() {
        let (client, server) = loopback().await;
        let pool = Pool::new();
        pool.set_main_session(Arc::new(Session::new(
            crate::transport::stream::Transport::Raw(client),
            ConnectionState::Operational,
        )))
        .await;

        let reads_seen = Arc::new(AtomicUsize::new(0));
        let reads_seen_writer = reads_seen.clone();
        let mut server_framer =
            crate::wire::framer::Framer::new(crate::transport::stream::Transport::Raw(server));
        let writer = tokio::spawn(async move {
            for id in 1..=11u32 {
                let frame = encode_response(&ResponseFrame {
                    message_id: id,
                    status: StatusCode::SUCCESS,
                    payload: None,
                })
                .expect("encode");
                if server_framer.write_frame(&frame).await.is_err() {
                    break;
                }
                reads_seen_writer.fetch_add(1, Ordering::SeqCst);
            }
        });

        let req = crate::wire::codec::encode_request(&RequestFrame {
            message_id: 999,
            operation: crate::wire::codec::Operation::Read,
            endpoint_id: 0,
            feature_id: 1,
            payload: None,
        })
        .expect("encode request");

        let err = pool.send_request(&req, 999, None).await.expect_err("must fail");
        assert!(matches!(err, HarnessError::Protocol(_)));
        let _ = writer.await;
    }

    #[tokio::test]
    async fn zone_cap_rejects_sixth_session() {
        let pool = Pool::new();
        for i in 0..LimitsConfig::default().max_zone_sessions {
            let (client, _server) = loopback().await;
            let session = Arc::new(Session::new(
                crate::transport::stream::Transport::Raw(client),
                ConnectionState::Operational,
            ));
            pool.add_zone_session(format!("zone-{i}"), format!("id-{i}"), session)
                .await
                .expect("under cap");
        }
        let (client, _server) = loopback().await;
        let session = Arc::new(Session::new(
            crate::transport::stream::Transport::Raw(client),
            ConnectionState::Operational,
        ));
        let err = pool
            .add_zone_session("zone-overflow", "id-overflow", session)
            .await
            .expect_err("must reject sixth zone");
        assert!(matches!(err, HarnessError::Protocol(_)));
    }

    #[tokio::test]
    async fn close_all_zones_clears_registry_and_invokes_hook_once_each() {
        let pool = Pool::new();
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_calls_cb = hook_calls.clone();
        pool.set_close_hook(Arc::new(move |_zone_id, _session| {
            hook_calls_cb.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        for i in 0..3 {
            let (client, _server) = loopback().await;
            let session = Arc::new(Session::new(
                crate::transport::stream::Transport::Raw(client),
                ConnectionState::Operational,
            ));
            pool.add_zone_session(format!("zone-{i}"), format!("id-{i}"), session)
                .await
                .expect("add");
        }

        let last_close = pool.close_all_zones().await;
        assert!(last_close > SystemTime::UNIX_EPOCH);
        assert_eq!(pool.zone_count(), 0);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 3);
    }
}
