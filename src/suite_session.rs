// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Suite-level session cache (spec.md §3, §4.3, §8 property 9): retains a
//! commissioned zone's crypto material across test cases so a later test
//! can re-enter commissioned state without redialing and re-running PASE.

use std::sync::Arc;

use rustls::RootCertStore;
use tokio::sync::RwLock;

use crate::transport::ClientIdentity;

/// Crypto material a commissioned session depends on. `zone_ca` is the raw
/// CA material as received; `zone_ca_pool` is the `RootCertStore` built
/// from it (spec.md §5: "replaced wholesale when Zone CA rotates", never
/// mutated in place).
#[derive(Debug, Clone, Default)]
pub struct Crypto {
    pub zone_ca: Option<Vec<u8>>,
    pub controller_cert: Option<ClientIdentity>,
    pub zone_ca_pool: Option<Arc<RootCertStore>>,
    pub issued_device_cert: Option<Vec<u8>>,
}

impl Crypto {
    pub fn is_empty(&self) -> bool {
        self.zone_ca.is_none()
            && self.controller_cert.is_none()
            && self.zone_ca_pool.is_none()
            && self.issued_device_cert.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct SuiteSessionRecord {
    pub zone_id: String,
    pub conn_key: String,
    pub crypto: Crypto,
}

/// Single-writer (the PASE layer), multi-reader cache of one
/// [`SuiteSessionRecord`] (spec.md §5 "Shared-resource policy").
pub struct SuiteSessionStore {
    record: RwLock<Option<SuiteSessionRecord>>,
}

impl SuiteSessionStore {
    pub fn new() -> Self {
        Self { record: RwLock::new(None) }
    }

    pub async fn record(&self) -> Option<SuiteSessionRecord> {
        self.record.read().await.clone()
    }

    pub async fn save(&self, record: SuiteSessionRecord) {
        *self.record.write().await = Some(record);
    }

    pub async fn clear(&self) {
        *self.record.write().await = None;
    }

    /// `ensureCommissioned`'s restore step: if `current` is already
    /// populated, leave it alone; otherwise adopt the suite record's crypto
    /// — but only if that crypto is itself non-empty. Property 9: an empty
    /// suite record MUST NOT overwrite current non-null crypto with null.
    pub async fn restore_crypto_if_missing(&self, current: &mut Crypto) {
        if !current.is_empty() {
            return;
        }
        let guard = self.record.read().await;
        if let Some(record) = guard.as_ref() {
            if !record.crypto.is_empty() {
                *current = record.crypto.clone();
            }
        }
    }
}

impl Default for SuiteSessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `ensureDisconnected` (spec.md §4.3): clears both the caller's live
/// crypto and the suite record, so a later fresh commission never inherits
/// stale trust anchors.
pub async fn ensure_disconnected(current: &mut Crypto, store: &SuiteSessionStore) {
    *current = Crypto::default();
    store.clear().await;
}
