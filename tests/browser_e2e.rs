//! Full browser runs against a built extension.
//!
//! Needs Firefox and geckodriver on `PATH` (or `REFMOD_WEBDRIVER` pointing
//! at a running driver). Set `REFMOD_EXTENSION_DIR` to the extension
//! directory containing `manifest.json` and the built
//! `referer-mod-{version}.zip`, then run with `cargo test -- --ignored`.

#![cfg(feature = "webdriver")]

use referer_mod_e2e::cases::default_suite;
use referer_mod_e2e::runner::Harness;
use referer_mod_e2e::HarnessConfig;
use std::path::PathBuf;

fn config() -> Option<HarnessConfig> {
    let dir = std::env::var("REFMOD_EXTENSION_DIR").ok()?;
    Some(HarnessConfig {
        extension_dir: PathBuf::from(dir),
        rules_path: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/test_config.json"),
        ..HarnessConfig::from_env()
    })
}

#[test]
#[ignore] // Requires Firefox, geckodriver and a built extension
fn test_referers() {
    let Some(config) = config() else {
        eprintln!("Skipping: REFMOD_EXTENSION_DIR is not set");
        return;
    };

    let harness = Harness::new(config).expect("Failed to set up harness");
    let report = harness.run_suite(&default_suite()).expect("Suite aborted");

    for outcome in &report.cases {
        assert!(outcome.passed(), "{} -> {}: {:?}", outcome.case.start, outcome.case.target, outcome.verdict);
    }
    assert!(report.passed(), "toggle round trip failed: {:?}", report.toggle);

    harness.finish().unwrap();
}

#[test]
#[ignore] // Requires Firefox, geckodriver and a built extension
fn test_options_page_import() {
    let Some(config) = config() else {
        eprintln!("Skipping: REFMOD_EXTENSION_DIR is not set");
        return;
    };

    let harness = Harness::new(HarnessConfig { check_toggle: false, ..config }).expect("Failed to set up harness");
    harness.import_rules().expect("Import failed");
    harness.finish().unwrap();
}
