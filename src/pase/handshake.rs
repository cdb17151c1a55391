// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SPAKE2+ client half of the PASE handshake (spec.md §4.3): a numeric
//! setup code in, a shared session key out, after one round trip plus a
//! confirmation exchange.
//!
//! Base SPAKE2 (the `spake2` crate) yields a shared secret after a single
//! message exchange; this layer adds the confirm/verify round the wire
//! protocol calls for by deriving two HKDF subkeys from that secret, one
//! per direction, so each side can prove it landed on the same key before
//! either trusts the channel.

use hkdf::Hkdf;
use sha2::Sha256;
use spake2::{Ed25519Group, Identity, Password, Spake2};

use crate::{
    error::{HarnessError, Result},
    models::pase_wire::{PaseConfirm, PaseRequest},
};

const DEVICE_IDENTITY: &[u8] = b"MASH-DEVICE";
const CLIENT_CONFIRM_LABEL: &[u8] = b"mash-pase-confirm-client";
const DEVICE_CONFIRM_LABEL: &[u8] = b"mash-pase-confirm-device";
const SESSION_KEY_LABEL: &[u8] = b"mash-pase-session-key";

pub struct PaseHandshake {
    client_identity: String,
    spake: Option<Spake2<Ed25519Group>>,
    shared_secret: Option<Vec<u8>>,
}

impl PaseHandshake {
    /// Starts the handshake from a numeric setup code, returning the
    /// handshake object and the `PASERequest` to send.
    pub fn start(setup_code: u64, client_identity: impl Into<String>) -> (Self, PaseRequest) {
        let client_identity = client_identity.into();
        let password = Password::new(setup_code.to_be_bytes());
        let (spake, outbound) = Spake2::<Ed25519Group>::start_a(
            &password,
            &Identity::new(client_identity.as_bytes()),
            &Identity::new(DEVICE_IDENTITY),
        );
        (
            Self { client_identity: client_identity.clone(), spake: Some(spake), shared_secret: None },
            PaseRequest { public_value: outbound, client_identity },
        )
    }

    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    /// Consumes the device's `PASEResponse` public value, finishes the
    /// SPAKE2 exchange, and returns the `PASEConfirm` to send.
    pub fn finish_and_confirm(&mut self, device_public_value: &[u8]) -> Result<PaseConfirm> {
        let spake = self
            .spake
            .take()
            .ok_or_else(|| HarnessError::protocol("PASE handshake already finished"))?;
        let shared_secret = spake
            .finish(device_public_value)
            .map_err(|e| HarnessError::device(crate::error::PaseErrorCode::AuthFailed, None).tap_log(&e))?;
        let confirm = derive_subkey(&shared_secret, CLIENT_CONFIRM_LABEL);
        self.shared_secret = Some(shared_secret);
        Ok(PaseConfirm { confirm })
    }

    /// Verifies the device's `PASEVerify` value against the expected
    /// device-direction confirmation subkey, then returns the derived
    /// session key. Uses a constant-time comparison: MAC confirmation
    /// values must not leak timing information about where they diverge.
    pub fn verify_and_derive_session_key(&self, device_verify: &[u8]) -> Result<Vec<u8>> {
        let shared_secret = self
            .shared_secret
            .as_ref()
            .ok_or_else(|| HarnessError::protocol("PASE confirm not yet sent"))?;
        let expected = derive_subkey(shared_secret, DEVICE_CONFIRM_LABEL);
        if !constant_time_eq(&expected, device_verify) {
            return Err(HarnessError::device(crate::error::PaseErrorCode::VerificationFailed, None));
        }
        Ok(derive_subkey(shared_secret, SESSION_KEY_LABEL))
    }
}

fn derive_subkey(shared_secret: &[u8], label: &[u8]) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(label, &mut okm).expect("32 bytes is a valid SHA-256 HKDF output length");
    okm.to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Small helper trait to attach a debug-only log line to an auth failure
/// without threading a `tracing` call through every error-construction
/// site.
trait TapLog {
    fn tap_log(self, source: &impl std::fmt::Display) -> Self;
}

impl TapLog for HarnessError {
    fn tap_log(self, source: &impl std::fmt::Display) -> Self {
        tracing::warn!(error = %source, "PASE handshake finish failed");
        self
    }
}

#[cfg(test)]
mod tests {
    use spake2::{Identity, Password, Spake2};

    use super::*;

    #[test]
    fn handshake_agrees_on_session_key_with_matching_setup_code() {
        let (mut client, req) = PaseHandshake::start(123_456, "controller-1");

        // Simulate the device side directly with the same crate.
        let (device_spake, device_pub) = Spake2::<Ed25519Group>::start_b(
            &Password::new(123_456u64.to_be_bytes()),
            &Identity::new(req.client_identity.as_bytes()),
            &Identity::new(DEVICE_IDENTITY),
        );
        let device_secret = device_spake.finish(&req.public_value).expect("device finish");

        let confirm = client.finish_and_confirm(&device_pub).expect("client confirm");
        let client_confirm_expected = derive_subkey(&device_secret, CLIENT_CONFIRM_LABEL);
        assert_eq!(confirm.confirm, client_confirm_expected);

        let device_verify = derive_subkey(&device_secret, DEVICE_CONFIRM_LABEL);
        let session_key =
            client.verify_and_derive_session_key(&device_verify).expect("verify");
        assert_eq!(session_key, derive_subkey(&device_secret, SESSION_KEY_LABEL));
    }

    #[test]
    fn mismatched_verify_value_is_rejected() {
        let (mut client, req) = PaseHandshake::start(1, "controller-1");
        let (device_spake, device_pub) = Spake2::<Ed25519Group>::start_b(
            &Password::new(1u64.to_be_bytes()),
            &Identity::new(req.client_identity.as_bytes()),
            &Identity::new(DEVICE_IDENTITY),
        );
        let _device_secret = device_spake.finish(&req.public_value).expect("device finish");
        client.finish_and_confirm(&device_pub).expect("client confirm");

        let err = client
            .verify_and_derive_session_key(&[0u8; 32])
            .expect_err("must reject bogus verify");
        assert!(matches!(err, HarnessError::Device { .. }));
    }
}
