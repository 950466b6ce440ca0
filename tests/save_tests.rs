//! Integration tests: saving, loading and verifying artifacts

mod fixtures;

use std::fs;

use artifact_vault::hash::sha256_hex;
use artifact_vault::sidecar::sidecar_path;
use artifact_vault::{
    ArtifactData, Integrity, ParentRef, SaveAction, SaveReason, SaveRequest, SidecarFormat, Sidecar, VaultError,
    VaultOptions, VersioningMode,
};
use fixtures::{version_count, TestVault};
use serde_json::json;

// === Versioning ===

#[test]
fn test_each_change_creates_a_version() {
    let tv = TestVault::new();

    let mut last = None;
    for i in 0..4 {
        let outcome = tv.save_text("report.txt", &format!("revision {i}"));
        assert_eq!(outcome.action, SaveAction::Written);
        last = outcome.version_id;
    }

    let record = tv.vault.artifact("report.txt").unwrap();
    assert_eq!(record.version_count, 4);
    assert_eq!(Some(record.latest_version_id), last);
}

#[test]
fn test_unchanged_content_is_skipped() {
    let tv = TestVault::new();
    let first = tv.save_text("data.txt", "same");
    let second = tv.save_text("data.txt", "same");

    assert_eq!(second.action, SaveAction::Skipped);
    assert_eq!(second.reason, SaveReason::NoChangePolicy);
    assert_eq!(second.version_id, first.version_id);
    assert_eq!(version_count(&tv.vault, "data.txt"), 1);
}

#[test]
fn test_json_formatting_is_not_a_change() {
    let tv = TestVault::new();
    tv.vault
        .save(SaveRequest::new("cfg.json", json!({"b": 1, "a": [1, 2]})))
        .unwrap();
    let outcome = tv
        .vault
        .save(SaveRequest::new("cfg.json", json!({"a": [1, 2], "b": 1})))
        .unwrap();

    assert_eq!(outcome.reason, SaveReason::NoChangePolicy);
    let loaded = tv.vault.load("cfg.json").unwrap();
    assert_eq!(loaded.as_json(), Some(&json!({"a": [1, 2], "b": 1})));
}

#[test]
fn test_code_change_creates_a_version() {
    let tv = TestVault::new();
    tv.vault
        .save(SaveRequest::new("out.txt", "x").code("fn v1"))
        .unwrap();
    let outcome = tv
        .vault
        .save(SaveRequest::new("out.txt", "x").code("fn v2"))
        .unwrap();

    assert_eq!(outcome.reason, SaveReason::CodeChanged);
    assert_eq!(version_count(&tv.vault, "out.txt"), 2);
}

#[test]
fn test_timestamp_mode_versions_every_save() {
    let tv = TestVault::with_options(VaultOptions::default().with_versioning(VersioningMode::Timestamp));
    tv.save_text("t.txt", "same");
    let outcome = tv.save_text("t.txt", "same");

    assert_eq!(outcome.reason, SaveReason::TimestampPolicy);
    assert_eq!(version_count(&tv.vault, "t.txt"), 2);
}

#[test]
fn test_versioning_off_leaves_no_history() {
    let tv = TestVault::with_options(VaultOptions::default().with_versioning(VersioningMode::Off));
    let outcome = tv.save_text("plain.txt", "hello");

    assert_eq!(outcome.reason, SaveReason::VersioningOff);
    assert!(outcome.version_id.is_none());
    assert_eq!(fs::read_to_string(tv.path("plain.txt")).unwrap(), "hello");
    assert!(sidecar_path(&tv.path("plain.txt"), SidecarFormat::Json).is_file());
    assert!(tv.vault.read_catalog().unwrap().artifacts.is_empty());
    assert!(!tv.vault.snapshot_store().versions_root().exists());
}

#[test]
fn test_deleted_live_file_is_rewritten() {
    let tv = TestVault::new();
    tv.save_text("gone.txt", "content");
    fs::remove_file(tv.path("gone.txt")).unwrap();

    let outcome = tv.save_text("gone.txt", "content");
    assert_eq!(outcome.action, SaveAction::Written);
    assert!(tv.path("gone.txt").is_file());
}

#[test]
fn test_versions_are_strictly_ordered() {
    let tv = TestVault::new();
    for i in 0..5 {
        tv.save_text("seq.txt", &i.to_string());
    }

    let catalog = tv.vault.read_catalog().unwrap();
    let record = catalog.artifact_by_path(&tv.path("seq.txt")).unwrap();
    let versions = catalog.versions_of(&record.artifact_id);
    assert!(versions.windows(2).all(|w| w[0].created_at < w[1].created_at));
    assert_eq!(versions.last().unwrap().version_id, record.latest_version_id);
}

// === Loading ===

#[test]
fn test_round_trip_is_byte_identical() {
    let tv = TestVault::new();
    let payload: Vec<u8> = (0u8..=255).collect();
    let outcome = tv
        .vault
        .save(SaveRequest::new("blob.bin", payload.clone()))
        .unwrap();

    let on_disk = fs::read(tv.path("blob.bin")).unwrap();
    assert_eq!(on_disk, payload);
    assert_eq!(outcome.content_hash, sha256_hex(&on_disk));
    assert_eq!(tv.vault.load("blob.bin").unwrap(), ArtifactData::Bytes(payload));
}

#[test]
fn test_load_older_version() {
    let tv = TestVault::new();
    let first = tv.save_text("notes.txt", "first");
    tv.save_text("notes.txt", "second");

    let old = tv
        .vault
        .load_version("notes.txt", first.version_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(old, ArtifactData::Text("first".into()));
    assert_eq!(tv.vault.load("notes.txt").unwrap(), ArtifactData::Text("second".into()));
}

#[test]
fn test_load_unknown_version_fails() {
    let tv = TestVault::new();
    tv.save_text("notes.txt", "first");

    let err = tv.vault.load_version("notes.txt", "nope").unwrap_err();
    assert!(matches!(err, VaultError::VersionNotFound { .. }));
}

#[test]
fn test_load_untracked_path_fails() {
    let tv = TestVault::new();
    let err = tv.vault.load("missing.txt").unwrap_err();
    assert!(matches!(err, VaultError::ArtifactNotFound { .. }));
}

// === Sidecars ===

#[test]
fn test_sidecar_describes_latest_version() {
    let tv = TestVault::new();
    tv.save_text("parent.txt", "p");
    let outcome = tv
        .vault
        .save(
            SaveRequest::new("child.txt", "c")
                .parent(ParentRef::latest("parent.txt"))
                .attribute("owner", "ingest")
                .identity_keys(["region"]),
        )
        .unwrap();

    let sidecar = Sidecar::read(&tv.path("child.txt"), &[SidecarFormat::Json])
        .unwrap()
        .unwrap();
    assert_eq!(sidecar.version_id, outcome.version_id);
    assert_eq!(sidecar.content_hash, outcome.content_hash);
    assert_eq!(sidecar.parents.len(), 1);
    assert_eq!(sidecar.parents[0].path, tv.path("parent.txt"));
    assert_eq!(sidecar.attributes["owner"], json!("ingest"));
    assert_eq!(sidecar.identity_keys, vec!["region".to_string()]);
}

#[test]
fn test_toml_sidecar_written_when_configured() {
    let options = VaultOptions::default().with_sidecar_formats(vec![SidecarFormat::Json, SidecarFormat::Toml]);
    let tv = TestVault::with_options(options);
    tv.save_text("both.txt", "x");

    assert!(sidecar_path(&tv.path("both.txt"), SidecarFormat::Json).is_file());
    assert!(sidecar_path(&tv.path("both.txt"), SidecarFormat::Toml).is_file());
}

// === Parents ===

#[test]
fn test_unknown_parent_rejected_before_write() {
    let tv = TestVault::new();
    let err = tv
        .vault
        .save(SaveRequest::new("orphan.txt", "x").parent(ParentRef::latest("nowhere.txt")))
        .unwrap_err();

    assert!(matches!(err, VaultError::MissingParentVersion { .. }));
    assert!(!tv.path("orphan.txt").exists());
    assert!(tv.vault.read_catalog().unwrap().artifacts.is_empty());
}

#[test]
fn test_unknown_parent_version_rejected() {
    let tv = TestVault::new();
    tv.save_text("parent.txt", "p");
    let err = tv
        .vault
        .save(SaveRequest::new("child.txt", "c").parent(ParentRef::at("parent.txt", "19700101T000000.000000Z-000000000000")))
        .unwrap_err();

    assert!(matches!(
        err,
        VaultError::MissingParentVersion {
            version_id: Some(_),
            ..
        }
    ));
}

// === Tracking and verification ===

#[test]
fn test_track_existing_file() {
    let tv = TestVault::new();
    fs::write(tv.path("external.log"), b"line 1\n").unwrap();

    let outcome = tv.vault.track("external.log").unwrap();
    assert_eq!(outcome.reason, SaveReason::NewArtifact);
    assert_eq!(tv.vault.artifact("external.log").unwrap().format_tag, "bytes");

    let again = tv.vault.track("external.log").unwrap();
    assert_eq!(again.action, SaveAction::Skipped);
}

#[test]
fn test_verify_detects_tampering() {
    let tv = TestVault::new();
    tv.save_text("ledger.txt", "balance: 10");
    assert!(tv.vault.verify("ledger.txt").unwrap().is_clean());

    fs::write(tv.path("ledger.txt"), "balance: 1000").unwrap();
    let report = tv.vault.verify("ledger.txt").unwrap();
    assert!(!report.is_clean());
    assert!(matches!(report.live, Integrity::Mismatch { .. }));
    assert!(report.versions.iter().all(|v| v.integrity == Integrity::Ok));
}

#[test]
fn test_artifact_outside_root_is_snapshotted() {
    let tv = TestVault::new();
    let outside = tempfile::TempDir::new().unwrap();
    let path = outside.path().join("shared.txt");

    let outcome = tv.vault.save(SaveRequest::new(&path, "shared")).unwrap();
    let version = outcome.version_id.unwrap();

    assert_eq!(tv.vault.load_version(&path, &version).unwrap(), ArtifactData::Text("shared".into()));
    assert!(tv.vault.snapshot_store().versions_root().join("_external").is_dir());
}
