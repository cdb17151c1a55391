// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cfg;
pub mod client;
pub mod error;
pub mod models;
pub mod pase;
pub mod pics;
pub mod session;
pub mod state_machine;
pub mod subscription;
pub mod suite_session;
pub mod transport;
pub mod wire;
pub mod zone;
