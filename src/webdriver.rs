//! Firefox session over WebDriver with the extension under test installed.
//!
//! All thirtyfour calls are async; the session owns a small tokio runtime and
//! blocks on each call so the rest of the harness stays synchronous.

use crate::geckodriver::DriverProcess;
use crate::manifest::ExtensionUuid;
use crate::page::{Observation, FRAME_ID};
use crate::profile;
use crate::rules::RuleConfig;
use crate::wait::poll_until;
use crate::{Error, HarnessConfig, Result};
use log::{debug, info, warn};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thirtyfour::common::capabilities::firefox::FirefoxPreferences;
use thirtyfour::extensions::addons::firefox::FirefoxTools;
use thirtyfour::prelude::*;
use tokio::runtime::Runtime;
use url::Url;

/// Set on the old document before a click; its absence means the new page
/// has replaced it.
const STALE_MARKER: &str = "window.__refmodStale = true;";
const IS_NEW_DOCUMENT: &str = "return window.__refmodStale !== true && document.readyState === 'complete';";

const MAIN_READY: &str = "return !!document.body && document.body.dataset.ready === '1';";

const FRAME_READY_TEMPLATE: &str = r#"
    const frame = document.getElementById('{{FRAME_ID}}');
    const doc = frame && frame.contentDocument;
    return !!doc && !!doc.body && doc.body.dataset.ready === '1';
"#;

const FRAME_HTML_TEMPLATE: &str = r#"
    const frame = document.getElementById('{{FRAME_ID}}');
    const doc = frame && frame.contentDocument;
    return doc && doc.documentElement ? doc.documentElement.outerHTML : null;
"#;

const IMPORT_DONE_TEMPLATE: &str = r#"
    const want = {{DOMAINS}};
    const have = Array.from(document.querySelectorAll('.hostname')).map(e => e.value);
    const any = document.getElementById('any_action');
    const same = document.getElementById('same_action');
    return want.every(d => have.includes(d))
        && !!any && any.value === '{{ANY}}'
        && !!same && same.value === '{{SAME}}';
"#;

const TOGGLE_IS_OFF: &str = r#"
    const button = document.getElementById('deactivate');
    return !!button && button.classList.contains('off');
"#;

const TOGGLE_LABEL: &str = "return document.getElementById('deactivate').innerText;";

/// Labels shown by the popup toggle during a round trip
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ToggleLabels {
    pub deactivated: String,
    pub reactivated: String,
}

/// The extension to install and the UUID its pages will live under
#[derive(Debug, Clone, Copy)]
pub struct AddonInstall<'a> {
    /// `browser_specific_settings.gecko.id`
    pub addon_id: &'a str,
    pub uuid: &'a ExtensionUuid,
    /// Packaged extension (`.zip` / `.xpi`)
    pub package: &'a Path,
}

/// A Firefox session with one controlled window
pub struct ExtensionBrowser {
    // drop order: session, then geckodriver, then the runtime
    driver: WebDriver,
    _geckodriver: Option<DriverProcess>,
    runtime: Runtime,
    timeout: Duration,
    poll_interval: Duration,
}

impl ExtensionBrowser {
    /// Start Firefox with a profile that pins the add-on UUID and proxies
    /// HTTP through the test server, then install the add-on temporarily.
    pub fn launch(config: &HarnessConfig, addon: AddonInstall<'_>) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let package = addon
            .package
            .canonicalize()
            .map_err(|e| Error::LaunchError(format!("Failed to resolve {}: {}", addon.package.display(), e)))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::LaunchError(format!("Failed to start async runtime: {}", e)))?;

        let geckodriver = match &config.webdriver_url {
            Some(_) => None,
            None => Some(DriverProcess::spawn(&config.geckodriver_path, timeout, poll_interval)?),
        };
        let server_url = match (&config.webdriver_url, &geckodriver) {
            (Some(url), _) => url.clone(),
            (None, Some(process)) => process.url(),
            (None, None) => return Err(Error::LaunchError("no WebDriver server available".into())),
        };

        let mut caps = DesiredCapabilities::firefox();
        if config.headless {
            caps.set_headless()?;
        }
        if let Some(binary) = &config.browser_path {
            caps.set_firefox_binary(&binary.to_string_lossy())?;
        }
        let mut prefs = FirefoxPreferences::new();
        for (key, value) in profile::seeded_prefs(addon.addon_id, addon.uuid, config.proxy_port) {
            prefs.set(key, value)?;
        }
        caps.set_preferences(prefs)?;

        let driver = runtime
            .block_on(WebDriver::new(&server_url, caps))
            .map_err(|e| Error::LaunchError(format!("Failed to start Firefox via {}: {}", server_url, e)))?;

        let setup = runtime.block_on(async {
            driver
                .set_window_rect(0, 0, config.viewport.width, config.viewport.height)
                .await?;
            driver.set_page_load_timeout(timeout).await?;
            FirefoxTools::new(driver.handle.clone())
                .install_addon(&package.to_string_lossy(), Some(true))
                .await
        });
        if let Err(e) = setup {
            let _ = runtime.block_on(driver.quit());
            return Err(Error::LaunchError(format!(
                "Failed to install {}: {}",
                package.display(),
                e
            )));
        }

        info!(
            "Firefox started ({}, proxy {}:{}), {} installed as moz-extension://{}",
            if config.headless { "headless" } else { "windowed" },
            profile::PROXY_HOST,
            config.proxy_port,
            addon.addon_id,
            addon.uuid
        );

        Ok(Self {
            driver,
            _geckodriver: geckodriver,
            runtime,
            timeout,
            poll_interval,
        })
    }

    fn block_on<F, T>(&self, fut: F) -> WebDriverResult<T>
    where
        F: Future<Output = WebDriverResult<T>>,
    {
        self.runtime.block_on(fut)
    }

    /// URL of the page currently shown
    pub fn current_url(&self) -> Result<String> {
        Ok(self.block_on(self.driver.current_url())?.to_string())
    }

    /// Load a URL and wait for the navigation to finish
    pub fn open(&self, url: &str) -> Result<()> {
        debug!("Opening {}", url);
        self.block_on(self.driver.goto(url))
            .map_err(|e| Error::NavigationError(format!("Navigation to {} failed: {}", url, e)))
    }

    /// Bounded poll against the current page
    pub fn wait_until<F>(&self, what: &str, check: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        poll_until(what, self.timeout, self.poll_interval, check)
    }

    fn eval(&self, body: &str) -> Result<serde_json::Value> {
        let ret = self
            .block_on(self.driver.execute(body, Vec::new()))
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(ret.json().clone())
    }

    fn eval_bool(&self, body: &str) -> Result<bool> {
        Ok(self.eval(body)?.as_bool().unwrap_or(false))
    }

    fn eval_string(&self, body: &str) -> Result<Option<String>> {
        Ok(self.eval(body)?.as_str().map(str::to_string))
    }

    fn element(&self, id: &str) -> Result<WebElement> {
        let mut found = None;
        self.wait_until(&format!("#{} to appear", id), || {
            found = self.block_on(self.driver.find(By::Id(id))).ok();
            Ok(found.is_some())
        })
        .map_err(|e| Error::ElementNotFound(format!("#{}: {}", id, e)))?;
        found.ok_or_else(|| Error::ElementNotFound(format!("#{}", id)))
    }

    /// Upload `rules_file` through the options page import form and wait
    /// until the page shows the imported configuration.
    pub fn import_rules(&self, options_url: &str, rules_file: &Path, rules: &RuleConfig) -> Result<()> {
        self.open(options_url)?;

        let file = rules_file
            .canonicalize()
            .map_err(|e| Error::RulesError(format!("Failed to resolve {}: {}", rules_file.display(), e)))?;
        let input = self.element("import_file")?;
        self.block_on(input.send_keys(file.to_string_lossy().as_ref()))?;

        let button = self.element("import_button")?;
        self.wait_until("the import button to be enabled", || Ok(self.block_on(button.is_enabled())?))?;
        self.block_on(button.click())?;

        let domains: Vec<&str> = rules.domains.iter().map(|d| d.domain.as_str()).collect();
        let check = IMPORT_DONE_TEMPLATE
            .replace("{{DOMAINS}}", &serde_json::to_string(&domains)?)
            .replace("{{ANY}}", rules.any.action.as_str())
            .replace("{{SAME}}", rules.same.action.as_str());
        self.wait_until("imported rules to appear on the options page", || self.eval_bool(&check))?;

        info!("Imported {} ({} domain rules)", file.display(), domains.len());
        Ok(())
    }

    /// Click the `Page` link whose target host is `host`. Returns the
    /// followed URL once the new document has loaded.
    pub fn click_page_link(&self, host: &str) -> Result<String> {
        let links = self
            .block_on(self.driver.find_all(By::LinkText("Page")))
            .map_err(|e| Error::ElementNotFound(format!("'Page' links: {}", e)))?;

        for link in links {
            let Some(href) = self.block_on(link.prop("href"))? else { continue };
            let same_host = Url::parse(&href)
                .ok()
                .map_or(false, |u| u.host_str() == Some(host));
            if !same_host {
                continue;
            }

            info!("Loading {}", href);
            self.eval(STALE_MARKER)?;
            self.block_on(link.click())
                .map_err(|e| Error::NavigationError(format!("Failed to click link to {}: {}", href, e)))?;
            // scripts fail while the old document is torn down
            self.wait_until(&format!("{} to load", href), || Ok(self.eval_bool(IS_NEW_DOCUMENT).unwrap_or(false)))?;
            return Ok(href);
        }

        Err(Error::ElementNotFound(format!(
            "no 'Page' link to {} on {}",
            host,
            self.current_url().unwrap_or_default()
        )))
    }

    /// Read the four referrer channels from the current page.
    ///
    /// The main page must finish its script; an iframe that never becomes
    /// ready only leaves its channels empty.
    pub fn observe(&self) -> Result<Observation> {
        self.wait_until("the page to show its referrer", || Ok(self.eval_bool(MAIN_READY).unwrap_or(false)))?;

        let frame_ready = FRAME_READY_TEMPLATE.replace("{{FRAME_ID}}", FRAME_ID);
        let frame_html = match self.wait_until("the iframe to show its referrer", || {
            Ok(self.eval_bool(&frame_ready).unwrap_or(false))
        }) {
            Ok(()) => self.eval_string(&FRAME_HTML_TEMPLATE.replace("{{FRAME_ID}}", FRAME_ID))?,
            Err(Error::Timeout { what, ms }) => {
                warn!("Gave up after {}ms waiting for {}", ms, what);
                None
            }
            Err(e) => return Err(e),
        };

        let main_html = self
            .block_on(self.driver.source())
            .map_err(|e| Error::ScriptError(format!("Failed to read page source: {}", e)))?;

        Ok(Observation::from_documents(&main_html, frame_html.as_deref()))
    }

    /// Switch the extension off and on again through its popup, waiting for
    /// the button state to follow each click.
    pub fn toggle_round_trip(&self, popup_url: &str) -> Result<ToggleLabels> {
        self.open(popup_url)?;
        let button = self.element("deactivate")?;

        let initially_off = self.eval_bool(TOGGLE_IS_OFF)?;
        if initially_off {
            warn!("Extension was already deactivated when the popup opened");
        }

        self.block_on(button.click())?;
        self.wait_until("the toggle to switch state", || Ok(self.eval_bool(TOGGLE_IS_OFF)? != initially_off))?;
        let deactivated = self.eval_string(TOGGLE_LABEL)?.unwrap_or_default();

        self.block_on(button.click())?;
        self.wait_until("the toggle to switch back", || Ok(self.eval_bool(TOGGLE_IS_OFF)? == initially_off))?;
        let reactivated = self.eval_string(TOGGLE_LABEL)?.unwrap_or_default();

        Ok(ToggleLabels { deactivated, reactivated })
    }

    /// End the WebDriver session and stop geckodriver
    pub fn close(self) -> Result<()> {
        let Self { runtime, driver, _geckodriver, .. } = self;
        if let Err(e) = runtime.block_on(driver.quit()) {
            debug!("Session quit failed: {}", e);
        }
        drop(_geckodriver);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_filled() {
        let frame = FRAME_READY_TEMPLATE.replace("{{FRAME_ID}}", FRAME_ID);
        assert!(frame.contains("getElementById('frame')"));
        assert!(!frame.contains("{{"));
    }

    #[test]
    fn test_scripts_return_values() {
        // WebDriver runs scripts as function bodies
        for script in [IS_NEW_DOCUMENT, MAIN_READY, FRAME_READY_TEMPLATE, FRAME_HTML_TEMPLATE, TOGGLE_IS_OFF, TOGGLE_LABEL] {
            assert!(script.contains("return "), "{}", script);
        }
    }

    #[test]
    fn test_launch_requires_package() {
        let config = HarnessConfig::default();
        let uuid = ExtensionUuid::generate();
        let addon = AddonInstall {
            addon_id: "referer-mod@example.org",
            uuid: &uuid,
            package: Path::new("/nonexistent/referer-mod-1.0.zip"),
        };
        match ExtensionBrowser::launch(&config, addon) {
            Err(Error::LaunchError(msg)) => assert!(msg.contains("/nonexistent/referer-mod-1.0.zip")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("launch should fail without a package"),
        }
    }
}
