// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use mash_conformance_core::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    client::pool::Pool,
    pase::commissioning::commission,
    pics::discovery::discover,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Smoke-test binary: commissions against the first configured zone, runs
/// auto-PICS discovery, and prints the resulting PICS map. Not part of the
/// conformance test harness itself — a standalone probe for exercising the
/// core against a real or simulated device during development.
#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger("tests/config_logger.yaml")?;

    let cfg = resolve_config_path("config/mash-probe.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let zone = cfg.zones.first().context("no zones configured")?;
    info!(zone = %zone.name, "commissioning");

    let cancel = CancellationToken::new();
    let commissioned = commission(
        &cfg.transport.device_addr,
        &cfg.transport.device_host,
        0, // setup code supplied out-of-band for a real device
        "mash-probe",
        None,
        None,
        &cfg.timeouts,
        &cancel,
    )
    .await
    .context("commission failed")?;

    let pool = Pool::with_config(cfg.timeouts.clone(), cfg.limits.clone());
    pool.set_main_session(commissioned.session.clone()).await;
    info!("commissioned, starting auto-PICS discovery");

    let report = if cfg.pics.discover_from_device {
        discover(&pool).await.context("auto-PICS discovery failed")?
    } else {
        info!("DiscoverFromDevice disabled, skipping discovery");
        return Ok(());
    };

    info!(vendor = %report.device_info.vendor, product = %report.device_info.product, pics_count = report.pics.len(), "discovery complete");
    for (key, value) in report.pics.iter() {
        println!("{key} = {value:?}");
    }

    pool.disconnect_main().await;
    Ok(())
}
