// casket-core/tests/upgrade.rs
mod common;

use std::fs;

use casket_common::caskroom;
use casket_common::error::CasketError;
use casket_core::install::{InstallOptions, Installer};
use casket_core::upgrade::{outdated_casks, upgrade_cask};
use common::{app_cask_json, info_plist_xml, tree, Fixture, SHA};

fn options() -> InstallOptions {
    InstallOptions {
        binaries: true,
        ..Default::default()
    }
}

/// Installs local-caffeine 1.2.3, then publishes `next` in the tap.
fn installed_fixture(next: &str) -> Fixture {
    let fx = Fixture::new();
    fx.add_app_cask("local-caffeine", "1.2.3", "Caffeine.app");
    Installer::new(fx.load("local-caffeine"), &fx.ctx, options())
        .install()
        .unwrap();
    fx.add_cask("local-caffeine", next);
    fx
}

fn info_plist(fx: &Fixture) -> String {
    fs::read_to_string(fx.appdir().join("Caffeine.app/Contents/Info.plist")).unwrap()
}

#[test]
fn upgrades_to_the_current_definition() {
    let fx = installed_fixture(&app_cask_json("local-caffeine", "1.2.4", "Caffeine.app", "[]"));

    let outdated = outdated_casks(&fx.ctx, &[], false, false).unwrap();
    assert_eq!(outdated.len(), 1);
    let new = outdated.into_iter().next().unwrap();
    let old = fx.ctx.loader.load_installed("local-caffeine").unwrap();
    assert_eq!(old.version_label(), "1.2.3");

    upgrade_cask(old.clone(), new.clone(), &fx.ctx, options()).unwrap();

    let root = fx.caskroom("local-caffeine");
    assert!(root.join("1.2.4").is_dir());
    assert!(!root.join("1.2.3").exists());
    assert!(!caskroom::backup_path(&old.staged_path(fx.config())).exists());
    assert!(!caskroom::backup_path(&old.metadata_versioned_path(fx.config())).exists());
    assert!(fx.appdir().join("Caffeine.app").is_dir());
    assert_eq!(new.installed_versions(fx.config()), vec!["1.2.4".to_string()]);
    assert!(outdated_casks(&fx.ctx, &[], false, false).unwrap().is_empty());
}

#[test]
fn failed_new_artifacts_restore_the_old_version() {
    let next = format!(
        r#"{{"token": "local-caffeine", "version": "1.2.4", "sha256": "{SHA}",
            "url": "https://example.com/local-caffeine-1.2.4.zip",
            "artifacts": [{{"app": "Caffeine.app"}}, {{"app": "Missing.app"}}]}}"#
    );
    let fx = installed_fixture(&next);
    let container = fx.add_container("local-caffeine", &["Caffeine.app"]);
    fs::write(container.join("Caffeine.app/Contents/Info.plist"), "new").unwrap();
    let old = fx.ctx.loader.load_installed("local-caffeine").unwrap();
    let new = fx.load("local-caffeine");
    let old_staged = old.staged_path(fx.config());
    let old_metadata = old.metadata_versioned_path(fx.config());
    let old_snapshot = caskroom::installed_caskfile(fx.config(), "local-caffeine").unwrap();

    let err = upgrade_cask(old.clone(), new.clone(), &fx.ctx, options()).unwrap_err();
    assert!(err.to_string().contains("Missing.app"));

    assert!(old_staged.is_dir());
    assert!(old_metadata.is_dir());
    assert!(old_snapshot.is_file());
    assert!(!caskroom::backup_path(&old_staged).exists());
    assert!(!caskroom::backup_path(&old_metadata).exists());
    assert!(!new.staged_path(fx.config()).exists());
    assert_eq!(info_plist(&fx), "Caffeine.app");
    assert_eq!(old.installed_version(fx.config()).as_deref(), Some("1.2.3"));
}

#[test]
fn failed_download_leaves_the_old_version_untouched() {
    let fx = installed_fixture(&app_cask_json("local-caffeine", "1.2.4", "Caffeine.app", "[]"));
    fx.downloader.fail_for("local-caffeine");
    let old = fx.ctx.loader.load_installed("local-caffeine").unwrap();
    let new = fx.load("local-caffeine");
    let before = tree(fx.tmp.path());

    let err = upgrade_cask(old.clone(), new, &fx.ctx, options()).unwrap_err();

    assert!(matches!(err, CasketError::CaskDownloadFailed(..)));
    assert_eq!(tree(fx.tmp.path()), before);
    assert!(!caskroom::backup_path(&old.staged_path(fx.config())).exists());
    assert_eq!(old.installed_version(fx.config()).as_deref(), Some("1.2.3"));
}

#[test]
fn same_version_failure_keeps_the_installed_record() {
    // A definition change that keeps the version string.
    let next = format!(
        r#"{{"token": "local-caffeine", "version": "1.2.3", "sha256": "{SHA}",
            "url": "https://example.com/local-caffeine-1.2.3.zip",
            "artifacts": [{{"app": "Caffeine.app"}}]}}"#
    );
    let fx = installed_fixture(&next);
    fx.downloader.fail_for("local-caffeine");
    let old = fx.ctx.loader.load_installed("local-caffeine").unwrap();
    let new = fx.load("local-caffeine");

    assert!(upgrade_cask(old.clone(), new, &fx.ctx, options()).is_err());
    assert!(old.staged_path(fx.config()).is_dir());
    assert!(old.is_installed(fx.config()));
}

#[test]
fn named_casks_must_be_installed() {
    let fx = Fixture::new();
    fx.add_app_cask("local-caffeine", "1.2.3", "Caffeine.app");

    let err = outdated_casks(&fx.ctx, &["local-caffeine".to_string()], false, false).unwrap_err();
    assert!(matches!(err, CasketError::CaskNotInstalled(_)));
    assert!(outdated_casks(&fx.ctx, &["local-caffeine".to_string()], false, true)
        .unwrap()
        .is_empty());
}

#[test]
fn latest_casks_are_only_upgraded_greedily() {
    let fx = Fixture::new();
    fx.add_cask(
        "nightly",
        r#"{"token": "nightly", "version": ":latest", "sha256": ":no_check",
            "url": "https://example.com/nightly.zip",
            "artifacts": [{"app": "Nightly.app"}]}"#,
    );
    fx.add_container("nightly", &["Nightly.app"]);
    Installer::new(fx.load("nightly"), &fx.ctx, options())
        .install()
        .unwrap();

    assert!(outdated_casks(&fx.ctx, &[], false, false).unwrap().is_empty());
    assert_eq!(outdated_casks(&fx.ctx, &[], true, false).unwrap().len(), 1);
    assert_eq!(
        outdated_casks(&fx.ctx, &["nightly".to_string()], false, false)
            .unwrap()
            .len(),
        1
    );
}

fn accessible_json(version: &str) -> String {
    format!(
        r#"{{"token": "helper", "version": "{version}", "sha256": "{SHA}",
            "url": "https://example.com/helper-{version}.zip", "accessibility_access": true,
            "artifacts": [{{"app": "Helper.app"}}]}}"#
    )
}

fn helper_container(fx: &Fixture, bundle_id: &str) {
    let container = fx.add_container("helper", &["Helper.app"]);
    fs::write(
        container.join("Helper.app/Contents/Info.plist"),
        info_plist_xml(bundle_id),
    )
    .unwrap();
}

#[test]
fn failed_grant_after_new_artifacts_restores_and_regrants_the_old_version() {
    let fx = Fixture::with_macos(Some("10.11"));
    fx.add_cask("helper", &accessible_json("1.0"));
    helper_container(&fx, "com.example.helper");
    Installer::new(fx.load("helper"), &fx.ctx, options())
        .install()
        .unwrap();

    fx.add_cask("helper", &accessible_json("2.0"));
    helper_container(&fx, "com.example.helper.next");
    fx.executor.fail_when("'com.example.helper.next'");
    let old = fx.ctx.loader.load_installed("helper").unwrap();
    let new = fx.load("helper");

    let err = upgrade_cask(old.clone(), new.clone(), &fx.ctx, options()).unwrap_err();
    assert!(err.to_string().contains("sqlite3"));

    let grants: Vec<String> = fx
        .executor
        .args_of("/usr/bin/sqlite3")
        .into_iter()
        .map(|args| args[1].clone())
        .collect();
    assert_eq!(grants.len(), 3);
    assert!(grants[0].contains("'com.example.helper'"));
    assert!(grants[1].contains("'com.example.helper.next'"));
    assert!(grants[2].contains("'com.example.helper'"));

    assert!(old.staged_path(fx.config()).is_dir());
    assert!(!new.staged_path(fx.config()).exists());
    assert!(!caskroom::backup_path(&old.staged_path(fx.config())).exists());
    assert_eq!(
        fs::read_to_string(fx.appdir().join("Helper.app/Contents/Info.plist")).unwrap(),
        info_plist_xml("com.example.helper")
    );
    assert_eq!(old.installed_version(fx.config()).as_deref(), Some("1.0"));
}
