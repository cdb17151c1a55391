// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Flood-test handle pool: a parallel-capable task opens many raw
//! connections against a device to probe accept/reject behavior under
//! load. Kept as a component separate from [`crate::client::pool::Pool`]
//! (spec.md §9 design note) because it is a parallel-capable probing task
//! with its own atomics, not a zone-scoped session consumer.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;

use crate::transport::stream::Transport;

#[derive(Debug, Clone, Copy, Default)]
pub struct FloodStats {
    pub accepted: u64,
    pub rejected: u64,
    pub peak: u64,
}

/// Lock-protected append of accepted handles, plus atomic counters for
/// accepted/rejected/peak (spec.md §5's explicit exception to "no
/// internal locking").
pub struct FloodHandlePool {
    handles: Mutex<Vec<Transport>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    peak: AtomicU64,
}

impl FloodHandlePool {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }

    pub async fn record_accept(&self, handle: Transport) {
        let mut guard = self.handles.lock().await;
        guard.push(handle);
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.peak.fetch_max(guard.len() as u64, Ordering::SeqCst);
    }

    pub fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn stats(&self) -> FloodStats {
        FloodStats {
            accepted: self.accepted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
        }
    }

    pub async fn open_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn close_all(&self) {
        self.handles.lock().await.clear();
    }
}

impl Default for FloodHandlePool {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedFloodHandlePool = Arc<FloodHandlePool>;
