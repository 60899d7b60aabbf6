//! Suite orchestration: server, browser, rule import, navigations, report.

use crate::cases::{TestCase, DEFAULT_START, TEST_HOSTS};
use crate::manifest::{package_sha256, ExtensionUuid, Manifest};
use crate::page::{Mismatch, Observation};
use crate::rules::RuleConfig;
use crate::server::TestServer;
use crate::webdriver::{AddonInstall, ExtensionBrowser, ToggleLabels};
use crate::{HarnessConfig, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;

/// Result of a single navigation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Mismatch { mismatch: Mismatch },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub case: TestCase,
    pub observed: Option<Observation>,
    pub verdict: Verdict,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Passed)
    }
}

/// Result of the popup enable/disable round trip
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToggleOutcome {
    Passed { labels: ToggleLabels },
    Error { message: String },
}

/// Everything a run produced, in case order
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub extension_version: String,
    pub addon_id: String,
    pub extension_uuid: String,
    pub package_sha256: String,
    pub cases: Vec<CaseOutcome>,
    pub toggle: Option<ToggleOutcome>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.cases.iter().all(CaseOutcome::passed)
            && !matches!(self.toggle, Some(ToggleOutcome::Error { .. }))
    }

    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed()).count()
            + usize::from(matches!(self.toggle, Some(ToggleOutcome::Error { .. })))
    }
}

/// A running test environment: test server plus browser with the
/// extension loaded.
pub struct Harness {
    config: HarnessConfig,
    manifest: Manifest,
    addon_id: String,
    uuid: ExtensionUuid,
    package: PathBuf,
    package_sha256: String,
    rules: RuleConfig,
    // declared before `server` so the browser goes away first
    browser: ExtensionBrowser,
    server: TestServer,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let manifest = Manifest::load(&config.extension_dir)?;
        let addon_id = manifest.addon_id()?.to_string();
        let package = config
            .addon_path
            .clone()
            .unwrap_or_else(|| manifest.package_path(&config.extension_dir));
        let package_sha256 = package_sha256(&package)?;
        let uuid = ExtensionUuid::generate();
        info!(
            "{} {} ({}), internal UUID {}",
            manifest.name.as_deref().unwrap_or(&addon_id),
            manifest.version,
            package.display(),
            uuid
        );
        debug!("Package SHA-256: {}", package_sha256);

        let rules = RuleConfig::load(&config.rules_path)?;

        let links: Vec<String> = TEST_HOSTS.iter().map(|h| format!("http://{}/", h)).collect();
        let server = TestServer::start(config.proxy_port, &links)?;
        let browser = ExtensionBrowser::launch(
            &config,
            AddonInstall {
                addon_id: &addon_id,
                uuid: &uuid,
                package: &package,
            },
        )?;

        Ok(Self {
            config,
            manifest,
            addon_id,
            uuid,
            package,
            package_sha256,
            rules,
            browser,
            server,
        })
    }

    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    pub fn server(&self) -> &TestServer {
        &self.server
    }

    pub fn options_url(&self) -> String {
        self.uuid.page_url(self.manifest.options_page())
    }

    pub fn popup_url(&self) -> String {
        self.uuid.page_url(self.manifest.popup_page())
    }

    /// Import the configured rule file through the options page
    pub fn import_rules(&self) -> Result<()> {
        self.browser
            .import_rules(&self.options_url(), &self.config.rules_path, &self.rules)
    }

    /// Import the rules, run every case, then the toggle round trip.
    ///
    /// Failing cases do not stop the run; only a failed import does.
    pub fn run_suite(&self, cases: &[TestCase]) -> Result<SuiteReport> {
        self.import_rules()?;

        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            self.cross_check(case);
            let outcome = self.run_case(case);
            match &outcome.verdict {
                Verdict::Passed => info!("PASS {} -> {}", case.start, case.target),
                Verdict::Mismatch { mismatch } => error!("FAIL {} -> {}: {}", case.start, case.target, mismatch),
                Verdict::Error { message } => error!("ERROR {} -> {}: {}", case.start, case.target, message),
            }
            outcomes.push(outcome);
        }

        let toggle = if self.config.check_toggle {
            Some(match self.browser.toggle_round_trip(&self.popup_url()) {
                Ok(labels) => {
                    info!("PASS popup toggle ('{}' / '{}')", labels.deactivated, labels.reactivated);
                    ToggleOutcome::Passed { labels }
                }
                Err(e) => {
                    error!("ERROR popup toggle: {}", e);
                    ToggleOutcome::Error { message: e.to_string() }
                }
            })
        } else {
            None
        };

        Ok(SuiteReport {
            extension_version: self.manifest.version.clone(),
            addon_id: self.addon_id.clone(),
            extension_uuid: self.uuid.to_string(),
            package_sha256: self.package_sha256.clone(),
            cases: outcomes,
            toggle,
        })
    }

    /// Navigate for one case and compare the observation
    pub fn run_case(&self, case: &TestCase) -> CaseOutcome {
        match self.navigate_and_observe(case) {
            Ok(observed) => {
                match &observed.header {
                    Some(referer) => info!("Page shows referer: {}", referer),
                    None => info!("Page shows no Referer."),
                }
                let verdict = match observed.verify(case.expected.as_deref()) {
                    Ok(()) => Verdict::Passed,
                    Err(mismatch) => Verdict::Mismatch { mismatch },
                };
                CaseOutcome { case: case.clone(), observed: Some(observed), verdict }
            }
            Err(e) => CaseOutcome {
                case: case.clone(),
                observed: None,
                verdict: Verdict::Error { message: e.to_string() },
            },
        }
    }

    fn navigate_and_observe(&self, case: &TestCase) -> Result<Observation> {
        if self.browser.current_url()? != case.start {
            self.browser.open(&case.start)?;
        }
        self.browser.click_page_link(&case.target)?;
        self.browser.observe()
    }

    /// Warn when a hand-written expectation disagrees with the rule file
    fn cross_check(&self, case: &TestCase) {
        match self.rules.expected_for_navigation(&case.start, &case.target_url()) {
            Ok(derived) if derived != case.expected => warn!(
                "Expectation for {} -> {} is {:?} but the rule file implies {:?}",
                case.start, case.target, case.expected, derived
            ),
            Ok(_) => {}
            Err(e) => warn!("Could not evaluate rules for {} -> {}: {}", case.start, case.target, e),
        }
    }

    /// Import the rules, show the start page and hand the browser over to
    /// the user until Enter is pressed.
    pub fn interactive(&self) -> Result<()> {
        self.import_rules()?;
        self.browser.open(DEFAULT_START)?;
        info!(
            "Interactive session on {} with {} (options: {})",
            DEFAULT_START,
            self.package.display(),
            self.options_url()
        );
        wait_for_enter("Press Enter to close the browser")
    }

    /// Shut everything down, first waiting for the user if `keep_open` is set
    pub fn finish(self) -> Result<()> {
        if self.config.keep_open {
            wait_for_enter("Press Enter to close the browser")?;
        }
        self.browser.close()?;
        drop(self.server);
        Ok(())
    }
}

fn wait_for_enter(prompt: &str) -> Result<()> {
    eprintln!("{}", prompt);
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Channel, ChannelMismatch};

    fn outcome(verdict: Verdict) -> CaseOutcome {
        CaseOutcome {
            case: TestCase::new(DEFAULT_START, "www.y.test", None),
            observed: None,
            verdict,
        }
    }

    fn report(cases: Vec<CaseOutcome>, toggle: Option<ToggleOutcome>) -> SuiteReport {
        SuiteReport {
            extension_version: "1.0".into(),
            addon_id: "referer-mod@example.org".into(),
            extension_uuid: "0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99".into(),
            package_sha256: "0".repeat(64),
            cases,
            toggle,
        }
    }

    #[test]
    fn test_report_pass_and_failure_count() {
        let ok = report(vec![outcome(Verdict::Passed)], None);
        assert!(ok.passed());
        assert_eq!(ok.failures(), 0);

        let mismatch = Mismatch {
            channels: vec![ChannelMismatch { channel: Channel::Header, expected: None, observed: Some("x".into()) }],
        };
        let bad = report(
            vec![outcome(Verdict::Passed), outcome(Verdict::Mismatch { mismatch })],
            Some(ToggleOutcome::Error { message: "timeout".into() }),
        );
        assert!(!bad.passed());
        assert_eq!(bad.failures(), 2);
    }

    #[test]
    fn test_report_serializes_with_status_tags() {
        let r = report(vec![outcome(Verdict::Error { message: "boom".into() })], None);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["cases"][0]["verdict"]["status"], "error");
        assert_eq!(json["cases"][0]["verdict"]["message"], "boom");
        assert_eq!(json["cases"][0]["case"]["expected"], serde_json::Value::Null);
    }
}
