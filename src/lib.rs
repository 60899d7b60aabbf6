//! Referer Modifier end-to-end tests
//!
//! Drives a real browser with the Referer Modifier extension installed,
//! imports a rule file through the extension's options page, follows links
//! between pages served by a local test server and checks the referrer each
//! destination page observes.
//!
//! # Features
//!
//! - **WebDriver Backend** (default): Firefox driven through geckodriver
//! - **Rule oracle**: expectations can be derived from the rule file itself
//! - **Test server**: reflects request headers and JS-visible referrers
//!
//! # Example
//!
//! ```no_run
//! use referer_mod_e2e::{cases, runner::Harness, HarnessConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::from_env();
//! let harness = Harness::new(config)?;
//! let report = harness.run_suite(&cases::default_suite())?;
//! assert!(report.passed());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod cases;
pub mod logging;
pub mod manifest;
pub mod page;
pub mod profile;
pub mod rules;
pub mod server;
pub mod wait;

#[cfg(feature = "webdriver")]
pub mod geckodriver;

#[cfg(feature = "webdriver")]
pub mod webdriver;

#[cfg(feature = "webdriver")]
pub mod runner;

/// Environment variable forcing headless mode on (`1`, `true`, `yes`) or off
pub const ENV_HEADLESS: &str = "REFMOD_HEADLESS";
/// Environment variable selecting an alternate Firefox binary
pub const ENV_BROWSER: &str = "REFMOD_BROWSER";
/// Environment variable pointing at an already running WebDriver server
pub const ENV_WEBDRIVER: &str = "REFMOD_WEBDRIVER";
/// Environment variable selecting the geckodriver binary to spawn
pub const ENV_GECKODRIVER: &str = "REFMOD_GECKODRIVER";

/// Configuration for a harness run
///
/// Defaults follow the extension repository layout: the extension is the current
/// directory, the rule file is `fixtures/test_config.json`, the test
/// server acts as HTTP proxy on port 8080 and a private geckodriver is
/// spawned from `PATH`.
///
/// # Examples
///
/// ```
/// let cfg = referer_mod_e2e::HarnessConfig::default();
/// assert_eq!(cfg.proxy_port, 8080);
/// ```
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Run the browser without a visible window
    pub headless: bool,
    /// Firefox binary to launch instead of the one geckodriver finds
    pub browser_path: Option<PathBuf>,
    /// Extension directory (contains `manifest.json` and the built package)
    pub extension_dir: PathBuf,
    /// Package to install instead of `referer-mod-{version}.zip`
    pub addon_path: Option<PathBuf>,
    /// WebDriver server to connect to; `None` spawns geckodriver
    pub webdriver_url: Option<String>,
    /// geckodriver binary used when spawning one
    pub geckodriver_path: PathBuf,
    /// Rule file imported through the options page
    pub rules_path: PathBuf,
    /// Port of the test server, which doubles as the browser's HTTP proxy
    pub proxy_port: u16,
    /// Browser window size
    pub viewport: Viewport,
    /// Upper bound for every wait, in milliseconds
    pub timeout_ms: u64,
    /// Interval between polls during a wait, in milliseconds
    pub poll_interval_ms: u64,
    /// Leave the browser open after the run until Enter is pressed
    pub keep_open: bool,
    /// Only start a browser for manual testing, run no assertions
    pub interactive: bool,
    /// Also exercise the popup's enable/disable toggle
    pub check_toggle: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            headless: true,
            browser_path: None,
            extension_dir: PathBuf::from("."),
            addon_path: None,
            webdriver_url: None,
            geckodriver_path: PathBuf::from("geckodriver"),
            rules_path: PathBuf::from("fixtures/test_config.json"),
            proxy_port: 8080,
            viewport: Viewport::default(),
            timeout_ms: 10_000,
            poll_interval_ms: 100,
            keep_open: false,
            interactive: false,
            check_toggle: true,
        }
    }
}

impl HarnessConfig {
    /// Defaults adjusted by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults adjusted by an arbitrary variable lookup.
    ///
    /// Headless mode follows `REFMOD_HEADLESS` when it holds a recognised
    /// boolean, otherwise it is on exactly when `DISPLAY` is unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.headless = lookup(ENV_HEADLESS)
            .and_then(|v| parse_bool(&v))
            .unwrap_or_else(|| lookup("DISPLAY").map_or(true, |d| d.is_empty()));
        config.browser_path = lookup(ENV_BROWSER)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        config.webdriver_url = lookup(ENV_WEBDRIVER).filter(|u| !u.trim().is_empty());
        if let Some(path) = lookup(ENV_GECKODRIVER).filter(|p| !p.trim().is_empty()) {
            config.geckodriver_path = PathBuf::from(path);
        }
        config
    }

    /// Reject settings that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::ConfigError("timeout_ms must be greater than zero".into()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.timeout_ms {
            return Err(Error::ConfigError(format!(
                "poll_interval_ms must be between 1 and timeout_ms ({})",
                self.timeout_ms
            )));
        }
        if self.proxy_port == 0 {
            return Err(Error::ConfigError("proxy_port must be a fixed port".into()));
        }
        if let Some(url) = &self.webdriver_url {
            url::Url::parse(url)
                .map_err(|e| Error::ConfigError(format!("invalid WebDriver URL '{}': {}", url, e)))?;
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Browser window dimensions
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}
