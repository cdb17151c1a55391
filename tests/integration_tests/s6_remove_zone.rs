// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use mash_conformance_core::zone::{ZoneRecord, ZoneRegistry};

#[tokio::test]
async fn remove_zone_reopens_commissioning_and_clears_two_zone_precondition() {
    let registry = ZoneRegistry::new();
    registry
        .add_zone(ZoneRecord { key: "z1".into(), zone_id: "z1".into(), priority: 1 })
        .await;
    registry
        .add_zone(ZoneRecord { key: "z2".into(), zone_id: "z2".into(), priority: 2 })
        .await;
    assert!(registry.device_in_two_zones().await);

    let removed = registry.remove_zone("z1").await.expect("z1 was configured");
    assert_eq!(removed.zone_id, "z1");

    assert_eq!(registry.zone_count().await, 1);
    assert!(!registry.device_in_two_zones().await);

    let flags = registry.commissioning_flags().await;
    assert!(flags.active, "commissioningActive");
    assert!(!flags.completed, "commissioningCompleted");
}
