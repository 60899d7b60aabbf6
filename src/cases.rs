//! Navigation test cases.

use crate::rules::RuleConfig;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Page every default suite starts from
pub const DEFAULT_START: &str = "http://web.x.test/page/";

/// Hosts the test server links to, in the order the default suite visits
/// them.
pub const TEST_HOSTS: [&str; 4] = ["web.x.test", "www.x.test", "site.y.test", "www.y.test"];

/// One navigation: open `start`, click the `Page` link pointing at `target`,
/// then expect `expected` on every referrer channel (`None`: no referrer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub start: String,
    pub target: String,
    pub expected: Option<String>,
}

impl TestCase {
    pub fn new(start: &str, target: &str, expected: Option<&str>) -> Self {
        Self {
            start: start.to_string(),
            target: target.to_string(),
            expected: expected.map(str::to_string),
        }
    }

    /// URL the `Page` link on the start page leads to
    pub fn target_url(&self) -> String {
        page_url(&self.target)
    }
}

/// The `/page/` URL on `host`
pub fn page_url(host: &str) -> String {
    format!("http://{}/page/", host)
}

/// Suite matching `fixtures/test_config.json`.
///
/// Each navigation continues from the page the previous one ended on, so
/// the starts chain through the targets.
pub fn default_suite() -> Vec<TestCase> {
    vec![
        TestCase::new(DEFAULT_START, "web.x.test", Some("http://web.x.test/page/")),
        TestCase::new("http://web.x.test/page/", "www.x.test", Some("http://web.x.test/")),
        TestCase::new("http://www.x.test/page/", "site.y.test", Some("https://www.example.com/")),
        TestCase::new("http://site.y.test/page/", "www.y.test", None),
    ]
}

/// Compute a chained suite from a rule file: start at `start`, visit
/// `targets` in order and let the rules decide each expectation.
pub fn derive_suite(rules: &RuleConfig, start: &str, targets: &[&str]) -> Result<Vec<TestCase>> {
    let mut from = start.to_string();
    let mut cases = Vec::with_capacity(targets.len());
    for target in targets {
        let url = page_url(target);
        let expected = rules.expected_for_navigation(&from, &url)?;
        cases.push(TestCase {
            start: from,
            target: target.to_string(),
            expected,
        });
        from = url;
    }
    Ok(cases)
}
