//! Rule files and the referrer resolution they describe.
//!
//! The harness uploads rule files to the extension verbatim, but it also
//! parses them: the import step is verified against the parsed domain list,
//! and [`RuleConfig::expected_referrer`] recomputes what the extension should
//! produce so a suite can be derived from (or cross-checked against) a rule
//! file.
//!
//! Resolution order for a request to `url` coming from `origin`:
//!
//! 1. domain rules matching the target host, exactly or as a subdomain; the
//!    longest `domain` wins and ties keep the earlier rule;
//! 2. `any` when there is no origin;
//! 3. `same` when origin and target share a hostname;
//! 4. `any` otherwise.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// What to do with the referrer of a matching request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Leave the referrer untouched
    Keep,
    /// Reduce the referrer to the origin of the referring page
    Prune,
    /// Use the origin of the target page
    Target,
    /// Use the configured `referer` string
    Replace,
    /// Send no referrer at all
    Remove,
}

impl Action {
    /// Name used in rule files and the options page `<select>` values
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Keep => "keep",
            Action::Prune => "prune",
            Action::Target => "target",
            Action::Replace => "replace",
            Action::Remove => "remove",
        }
    }
}

/// Action plus replacement value, as used by the `same` and `any` entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefererConf {
    pub action: Action,
    #[serde(default)]
    pub referer: String,
}

impl RefererConf {
    pub fn new(action: Action) -> Self {
        Self { action, referer: String::new() }
    }

    fn default_same() -> Self {
        Self::new(Action::Keep)
    }

    fn default_any() -> Self {
        Self::new(Action::Prune)
    }
}

/// A per-domain rule. `domain` also covers all of its subdomains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRule {
    pub domain: String,
    pub action: Action,
    #[serde(default)]
    pub referer: String,
}

impl DomainRule {
    /// Whether `hostname` is `domain` or one of its subdomains.
    pub fn matches(&self, hostname: &str) -> bool {
        match hostname.strip_suffix(self.domain.as_str()) {
            Some("") => true,
            Some(prefix) => prefix.ends_with('.'),
            None => false,
        }
    }
}

/// Where a resolved configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSource<'a> {
    Domain(&'a str),
    Same,
    Any,
}

/// The configuration that applies to one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub action: Action,
    pub referer: &'a str,
    pub source: RuleSource<'a>,
}

/// Parsed rule file, in the format the options page imports and exports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub domains: Vec<DomainRule>,
    #[serde(default = "RefererConf::default_same")]
    pub same: RefererConf,
    #[serde(default = "RefererConf::default_any")]
    pub any: RefererConf,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            same: RefererConf::default_same(),
            any: RefererConf::default_any(),
        }
    }
}

impl RuleConfig {
    /// Parse and validate a rule file from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuleConfig = serde_json::from_str(json)
            .map_err(|e| Error::RulesError(format!("Failed to parse rules: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a rule file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::RulesError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Domain names must be non-empty and free of surrounding whitespace
    /// (the options page trims them before storing).
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.domains.iter().enumerate() {
            if rule.domain.is_empty() {
                return Err(Error::RulesError(format!("domain rule #{} has an empty domain", i)));
            }
            if rule.domain.trim() != rule.domain {
                return Err(Error::RulesError(format!(
                    "domain rule #{} ('{}') has surrounding whitespace",
                    i, rule.domain
                )));
            }
        }
        Ok(())
    }

    /// Look up the configuration for a request to `url` from `origin`.
    pub fn find_host_conf(&self, url: &str, origin: Option<&str>) -> Result<Resolved<'_>> {
        let target = parse_url(url)?;
        let hostname = target.host_str().unwrap_or_default();

        let mut best: Option<&DomainRule> = None;
        for rule in self.domains.iter().filter(|d| d.matches(hostname)) {
            match best {
                Some(b) if b.domain.len() >= rule.domain.len() => {}
                _ => best = Some(rule),
            }
        }
        if let Some(rule) = best {
            return Ok(Resolved {
                action: rule.action,
                referer: &rule.referer,
                source: RuleSource::Domain(&rule.domain),
            });
        }

        let Some(origin) = origin.filter(|o| !o.is_empty()) else {
            return Ok(self.any.resolved(RuleSource::Any));
        };
        let source = parse_url(origin)?;
        if source.host_str() == target.host_str() {
            Ok(self.same.resolved(RuleSource::Same))
        } else {
            Ok(self.any.resolved(RuleSource::Any))
        }
    }

    /// The `document.referrer` value the extension exposes on `url` when it
    /// was loaded from `origin`. An empty string means "no referrer".
    pub fn compute_referrer(&self, url: &str, origin: Option<&str>) -> Result<String> {
        let conf = self.find_host_conf(url, origin)?;
        let origin = origin.unwrap_or_default();
        Ok(match conf.action {
            Action::Prune if origin.is_empty() => String::new(),
            Action::Prune => origin_slash(&parse_url(origin)?),
            Action::Target => origin_slash(&parse_url(url)?),
            Action::Replace => conf.referer.to_string(),
            Action::Remove => String::new(),
            Action::Keep => origin.to_string(),
        })
    }

    /// The `Referer` header the extension lets through for a request to
    /// `url` from `origin`, given the header the browser wanted to send.
    pub fn rewrite_header(&self, url: &str, origin: Option<&str>, current: Option<&str>) -> Result<Option<String>> {
        let conf = self.find_host_conf(url, origin)?;
        let rewritten = match (conf.action, current) {
            (Action::Prune, Some(value)) => Some(origin_slash(&parse_url(value)?)),
            (Action::Target, _) => Some(origin_slash(&parse_url(url)?)),
            (Action::Replace, _) => Some(conf.referer.to_string()),
            (Action::Remove, _) => None,
            (Action::Keep, value) | (Action::Prune, value @ None) => value.map(str::to_string),
        };
        Ok(rewritten)
    }

    /// What the destination page should observe on every channel, `None`
    /// meaning no referrer at all.
    pub fn expected_referrer(&self, url: &str, origin: Option<&str>) -> Result<Option<String>> {
        let value = self.compute_referrer(url, origin)?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    /// What the destination page should observe after following a link
    /// from page `from` to `to`. The extension sees the referrer the browser
    /// computed, not the full address of the referring page.
    pub fn expected_for_navigation(&self, from: &str, to: &str) -> Result<Option<String>> {
        let origin = browser_referrer(from, to)?;
        self.expected_referrer(to, origin.as_deref())
    }
}

impl RefererConf {
    fn resolved(&self, source: RuleSource<'static>) -> Resolved<'_> {
        Resolved { action: self.action, referer: &self.referer, source }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::NavigationError(format!("invalid URL '{}': {}", raw, e)))
}

fn origin_slash(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

/// The referrer a browser sends for a navigation from `from` to `to` on its
/// own, under the default `strict-origin-when-cross-origin` policy: the full
/// URL (without fragment and credentials) within one origin, only the origin
/// across origins, nothing when leaving HTTPS for plain HTTP.
pub fn browser_referrer(from: &str, to: &str) -> Result<Option<String>> {
    let source = parse_url(from)?;
    let target = parse_url(to)?;

    if source.scheme() == "https" && target.scheme() != "https" {
        return Ok(None);
    }
    if source.origin() != target.origin() {
        return Ok(Some(origin_slash(&source)));
    }

    let mut full = source;
    full.set_fragment(None);
    // only fails for URLs that cannot carry credentials
    let _ = full.set_username("");
    let _ = full.set_password(None);
    Ok(Some(full.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(domain: &str, action: Action, referer: &str) -> DomainRule {
        DomainRule { domain: domain.to_string(), action, referer: referer.to_string() }
    }

    fn sample() -> RuleConfig {
        RuleConfig {
            domains: vec![
                rule("y.test", Action::Replace, "https://www.example.com/"),
                rule("www.y.test", Action::Remove, ""),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_domain_match_covers_subdomains_only() {
        let r = rule("y.test", Action::Keep, "");
        assert!(r.matches("y.test"));
        assert!(r.matches("www.y.test"));
        assert!(r.matches("a.b.y.test"));
        assert!(!r.matches("xy.test"));
        assert!(!r.matches("y.test.example"));
    }

    #[test]
    fn test_longest_domain_wins() {
        let cfg = sample();
        let conf = cfg.find_host_conf("http://www.y.test/page/", Some("http://site.y.test/page/")).unwrap();
        assert_eq!(conf.source, RuleSource::Domain("www.y.test"));
        assert_eq!(conf.action, Action::Remove);

        let conf = cfg.find_host_conf("http://site.y.test/page/", None).unwrap();
        assert_eq!(conf.source, RuleSource::Domain("y.test"));
    }

    #[test]
    fn test_equal_length_keeps_first_rule() {
        let cfg = RuleConfig {
            domains: vec![rule("a.test", Action::Remove, ""), rule("a.test", Action::Target, "")],
            ..Default::default()
        };
        let conf = cfg.find_host_conf("http://a.test/", None).unwrap();
        assert_eq!(conf.action, Action::Remove);
    }

    #[test]
    fn test_fallbacks() {
        let cfg = sample();
        let same = cfg.find_host_conf("http://web.x.test/a", Some("http://web.x.test/b")).unwrap();
        assert_eq!(same.source, RuleSource::Same);
        let any = cfg.find_host_conf("http://www.x.test/a", Some("http://web.x.test/b")).unwrap();
        assert_eq!(any.source, RuleSource::Any);
        let none = cfg.find_host_conf("http://www.x.test/a", Some("")).unwrap();
        assert_eq!(none.source, RuleSource::Any);
    }

    #[test]
    fn test_compute_referrer_actions() {
        let cfg = sample();
        assert_eq!(
            cfg.compute_referrer("http://web.x.test/page/", Some("http://web.x.test/page/")).unwrap(),
            "http://web.x.test/page/"
        );
        assert_eq!(
            cfg.compute_referrer("http://www.x.test/page/", Some("http://web.x.test/page/")).unwrap(),
            "http://web.x.test/"
        );
        assert_eq!(
            cfg.compute_referrer("http://site.y.test/page/", Some("http://www.x.test/page/")).unwrap(),
            "https://www.example.com/"
        );
        assert_eq!(cfg.compute_referrer("http://www.y.test/page/", Some("http://site.y.test/page/")).unwrap(), "");
    }

    #[test]
    fn test_target_action_uses_target_origin() {
        let cfg = RuleConfig { any: RefererConf::new(Action::Target), ..Default::default() };
        assert_eq!(
            cfg.compute_referrer("http://b.test:8080/deep/path?q=1", Some("http://a.test/")).unwrap(),
            "http://b.test:8080/"
        );
    }

    #[test]
    fn test_rewrite_header_without_existing_header() {
        let cfg = sample();
        // keep/prune never invent a header
        assert_eq!(cfg.rewrite_header("http://web.x.test/", None, None).unwrap(), None);
        assert_eq!(
            cfg.rewrite_header("http://site.y.test/", None, None).unwrap().as_deref(),
            Some("https://www.example.com/")
        );
        let target = RuleConfig { any: RefererConf::new(Action::Target), ..Default::default() };
        assert_eq!(
            target.rewrite_header("http://b.test/x", None, None).unwrap().as_deref(),
            Some("http://b.test/")
        );
    }

    #[test]
    fn test_rewrite_header_prunes_current_value() {
        let cfg = RuleConfig::default();
        let out = cfg
            .rewrite_header("http://b.test/", Some("http://a.test/p"), Some("http://a.test/p?secret=1"))
            .unwrap();
        assert_eq!(out.as_deref(), Some("http://a.test/"));
    }

    #[test]
    fn test_expected_referrer_normalises_empty() {
        let cfg = RuleConfig {
            domains: vec![rule("e.test", Action::Replace, "")],
            ..Default::default()
        };
        assert_eq!(cfg.expected_referrer("http://e.test/", Some("http://a.test/")).unwrap(), None);
    }

    #[test]
    fn test_browser_referrer_policy() {
        assert_eq!(
            browser_referrer("http://web.x.test/page/#top", "http://web.x.test/page/").unwrap().as_deref(),
            Some("http://web.x.test/page/")
        );
        assert_eq!(
            browser_referrer("http://user:pw@web.x.test/page/?q=1", "http://web.x.test/other").unwrap().as_deref(),
            Some("http://web.x.test/page/?q=1")
        );
        assert_eq!(
            browser_referrer("http://web.x.test/page/", "http://www.x.test/page/").unwrap().as_deref(),
            Some("http://web.x.test/")
        );
        // port is part of the origin
        assert_eq!(
            browser_referrer("http://web.x.test:8080/page/", "http://web.x.test/page/").unwrap().as_deref(),
            Some("http://web.x.test:8080/")
        );
        assert_eq!(browser_referrer("https://a.test/p", "http://a.test/p").unwrap(), None);
    }

    #[test]
    fn test_keep_sees_cross_origin_referrer_as_origin() {
        let cfg = RuleConfig { any: RefererConf::new(Action::Keep), ..Default::default() };
        assert_eq!(
            cfg.expected_for_navigation("http://web.x.test/page/", "http://www.x.test/page/").unwrap().as_deref(),
            Some("http://web.x.test/")
        );
        assert_eq!(
            cfg.expected_for_navigation("http://web.x.test/page/", "http://web.x.test/page/").unwrap().as_deref(),
            Some("http://web.x.test/page/")
        );
        // from HTTPS to HTTP there is nothing to keep
        assert_eq!(cfg.expected_for_navigation("https://web.x.test/page/", "http://www.x.test/page/").unwrap(), None);
    }

    #[test]
    fn test_parse_defaults_and_validation() {
        let cfg = RuleConfig::from_json(r#"{"domains": [{"domain": "a.test", "action": "target"}]}"#).unwrap();
        assert_eq!(cfg.same.action, Action::Keep);
        assert_eq!(cfg.any.action, Action::Prune);
        assert_eq!(cfg.domains[0].referer, "");

        assert!(RuleConfig::from_json(r#"{"domains": [{"domain": "", "action": "keep"}]}"#).is_err());
        assert!(RuleConfig::from_json(r#"{"domains": [{"domain": " a.test", "action": "keep"}]}"#).is_err());
        assert!(RuleConfig::from_json(r#"{"any": {"action": "explode"}}"#).is_err());
    }
}
