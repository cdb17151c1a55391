// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy for the connection/session core.
//!
//! Three kinds, per the conformance contract: `Infrastructure` errors are
//! retryable by the caller and never a conformance failure; `Device` errors
//! are test-visible device behavior (PASE rejection, zone-slots-full, ...);
//! `Protocol` is the conservative default for anything that doesn't fit
//! either of the above (decode failures, orphan saturation, unexpected
//! message types).
//!
//! Call sites that only need ad-hoc context (config loading, YAML parsing)
//! keep using `anyhow::Result`; `HarnessError` is reserved for the seams the
//! spec says must be classified.

use thiserror::Error;

/// PASE / commissioning wire error codes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaseErrorCode {
    AuthFailed,
    VerificationFailed,
    CsrFailed,
    CertInstallFailed,
    Busy,
    ZoneTypeExists,
    Unknown(u32),
}

impl From<u32> for PaseErrorCode {
    fn from(v: u32) -> Self {
        match v {
            1 => Self::AuthFailed,
            2 => Self::VerificationFailed,
            3 => Self::CsrFailed,
            4 => Self::CertInstallFailed,
            5 => Self::Busy,
            10 => Self::ZoneTypeExists,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    /// EOF, connection-reset, broken-pipe, cooldown-active,
    /// already-in-progress. Retryable by the caller.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// PASE auth/verify/CSR/cert-install failures, zone-slots-full,
    /// zone-type-exists. Not retryable; test-visible device behavior.
    #[error("device error {code:?} (retry_after={retry_after:?})")]
    Device {
        code: PaseErrorCode,
        retry_after: Option<u32>,
    },

    /// Frame decode failure, unexpected message type, orphan saturation,
    /// decode-vs-wire mismatch. Conservative default for unclassified
    /// errors.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HarnessError {
    pub fn infra(msg: impl Into<String>) -> Self {
        Self::Infrastructure(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn device(code: PaseErrorCode, retry_after: Option<u32>) -> Self {
        Self::Device { code, retry_after }
    }

    /// Whether a caller may retry this error without it counting against
    /// conformance.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        Self::Infrastructure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
