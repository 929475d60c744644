mod support;

use serde_json::json;
use support::{names, Fixture};

#[test]
fn full_state_walks_pools_datasets_and_snapshots() {
    let fx = Fixture::new();
    let state = fx.manager().exporter().export_full_state();
    assert!(state.is_ok(), "{state:?}");
    assert_eq!(state.meta().unwrap()["source"], "cli");
    assert_eq!(state.meta().unwrap()["dry_run"], false);

    let data = state.data().unwrap();
    let pool = &data["pools"][0];
    assert_eq!(pool["name"], "tank");
    assert_eq!(pool["guid"], "1234567890");
    assert_eq!(pool["props"], json!({"ashift": "12", "autotrim": "off", "comment": "-"}));
    assert_eq!(pool["features"].as_array().unwrap().len(), 2);
    assert!(pool["status_verbose"].as_str().unwrap().contains("pool: tank"));
    assert!(pool["iostat"].as_str().unwrap().contains("capacity"));

    assert_eq!(names(&pool["datasets"]), vec!["tank", "tank/data", "tank/vol"]);
    let data_ds = &pool["datasets"][1];
    assert_eq!(data_ds["type"], "filesystem");
    assert_eq!(data_ds["props"]["compression"], "off");
    assert_eq!(names(&data_ds["snapshots"]), vec!["tank/data@s0"]);
    assert_eq!(data_ds["bookmarks"], json!([]));

    assert_eq!(names(&data["all_snapshots"]), vec!["tank/data@s0"]);
}

#[test]
fn one_broken_dataset_does_not_abort_the_export() {
    let mut state = support::default_state();
    state["broken"] = json!(["tank/data"]);
    let fx = Fixture::with_state(state);

    let exported = fx.manager().exporter().export_full_state();
    assert!(exported.is_ok(), "{exported:?}");
    let datasets = &exported.data().unwrap()["pools"][0]["datasets"];
    assert_eq!(datasets[1]["name"], "tank/data");
    assert_eq!(datasets[1]["props"], json!({}));
    assert_eq!(names(&datasets[1]["snapshots"]), vec!["tank/data@s0"]);
    assert_eq!(datasets[2]["props"]["volsize"], "10G");
}

#[test]
fn parallel_walk_matches_sequential() {
    let mut state = support::default_state();
    state["pools"]["backup"] = json!({"guid": "42", "health": "DEGRADED", "props": {}});
    state["datasets"]["backup"] = json!({"type": "filesystem", "props": {}});
    let fx = Fixture::with_state(state);

    let sequential = fx.manager().exporter().export_full_state();
    let mut config = fx.config();
    config.inventory.parallel_pools = true;
    let parallel = poolwarden_zfs::ZfsManager::from_config(&config)
        .unwrap()
        .exporter()
        .export_full_state();

    assert!(parallel.is_ok(), "{parallel:?}");
    assert_eq!(parallel.data(), sequential.data());
    let pools = &parallel.data().unwrap()["pools"];
    assert_eq!(names(pools), vec!["backup", "tank"]);
    assert_eq!(names(&pools[0]["datasets"]), vec!["backup"]);
}

#[test]
fn pool_enumeration_failure_fails_the_export() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.zfs.zpool_path = Some("/bin/false".to_string());
    let mgr = poolwarden_zfs::ZfsManager::from_config(&config).unwrap();

    let exported = mgr.exporter().export_full_state();
    assert!(!exported.is_ok());
    assert_eq!(exported.error().unwrap().code, "command_failed");
}

#[test]
fn policy_excludes_denied_pools_from_inventory() {
    let mut state = support::default_state();
    state["pools"]["backup"] = json!({"guid": "42", "health": "ONLINE", "props": {}});
    state["datasets"]["backup"] = json!({"type": "filesystem", "props": {}});
    let fx = Fixture::with_state(state);
    let mut config = fx.config();
    config.policy.deny_pools = vec!["backup".to_string()];

    let exported = poolwarden_zfs::ZfsManager::from_config(&config)
        .unwrap()
        .exporter()
        .export_full_state();
    assert_eq!(names(&exported.data().unwrap()["pools"]), vec!["tank"]);
}
