//! Manifest loading and package lookup from an extension directory

use referer_mod_e2e::manifest::{package_sha256, ExtensionUuid, Manifest};
use referer_mod_e2e::profile::{seeded_prefs, PREF_WEBEXTENSION_UUIDS};
use std::fs;

const MANIFEST: &str = r#"{
    "name": "Referer Modifier",
    "version": "0.10",
    "browser_specific_settings": {"gecko": {"id": "referer-mod@example.org"}},
    "browser_action": {"default_popup": "ui/popup.html"}
}"#;

#[test]
fn test_load_and_locate_package() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("manifest.json"), MANIFEST).unwrap();
    fs::write(dir.path().join("referer-mod-0.10.zip"), b"PK\x05\x06").unwrap();

    let manifest = Manifest::load(dir.path()).expect("Failed to load manifest");
    assert_eq!(manifest.version, "0.10");
    assert_eq!(manifest.popup_page(), "ui/popup.html");
    assert_eq!(manifest.addon_id().unwrap(), "referer-mod@example.org");

    let package = manifest.package_path(dir.path());
    assert!(package.ends_with("referer-mod-0.10.zip"));
    assert_eq!(package_sha256(&package).unwrap().len(), 64);
}

#[test]
fn test_seeded_uuid_names_the_options_page() {
    let manifest = Manifest::from_json(MANIFEST).unwrap();
    let uuid = ExtensionUuid::generate();
    let prefs = seeded_prefs(manifest.addon_id().unwrap(), &uuid, 8080);

    let (_, map) = prefs.iter().find(|(k, _)| *k == PREF_WEBEXTENSION_UUIDS).unwrap();
    let map: serde_json::Value = serde_json::from_str(map.as_str().unwrap()).unwrap();
    let seeded = map["referer-mod@example.org"].as_str().unwrap();

    assert_eq!(
        uuid.page_url(manifest.options_page()),
        format!("moz-extension://{}/options.html", seeded)
    );
}

#[test]
fn test_unbuilt_package_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("manifest.json"), MANIFEST).unwrap();
    let manifest = Manifest::load(dir.path()).unwrap();
    let err = package_sha256(&manifest.package_path(dir.path())).unwrap_err();
    assert!(err.to_string().contains("referer-mod-0.10.zip"));
}

#[test]
fn test_missing_manifest() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(Manifest::load(dir.path()).is_err());
}
