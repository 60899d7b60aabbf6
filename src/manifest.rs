//! Extension manifest metadata and the pre-seeded internal UUID.
//!
//! Firefox addresses extension pages as `moz-extension://{uuid}/...`, where
//! the UUID is normally random per profile. The harness picks the UUID up
//! front and seeds it into the profile under the add-on ID declared in
//! `browser_specific_settings.gecko.id`, so options and popup URLs are known
//! before the browser starts.

use crate::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Deserialize)]
struct GeckoSettings {
    id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BrowserSpecificSettings {
    gecko: Option<GeckoSettings>,
}

#[derive(Debug, Clone, Deserialize)]
struct OptionsUi {
    page: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionUi {
    default_popup: Option<String>,
}

/// The subset of `manifest.json` the harness reads
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub name: Option<String>,
    pub version: String,
    browser_specific_settings: Option<BrowserSpecificSettings>,
    options_ui: Option<OptionsUi>,
    action: Option<ActionUi>,
    browser_action: Option<ActionUi>,
}

impl Manifest {
    /// Parse a manifest from its JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| Error::ManifestError(format!("Failed to parse manifest: {}", e)))?;
        if manifest.version.trim().is_empty() {
            return Err(Error::ManifestError("manifest has an empty version".into()));
        }
        Ok(manifest)
    }

    /// Load `manifest.json` from the extension directory
    pub fn load(extension_dir: &Path) -> Result<Self> {
        let path = extension_dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path)
            .map_err(|e| Error::ManifestError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Add-on ID declared for Gecko based browsers, if any
    pub fn gecko_id(&self) -> Option<&str> {
        self.browser_specific_settings
            .as_ref()
            .and_then(|b| b.gecko.as_ref())
            .and_then(|g| g.id.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    /// The add-on ID the UUID map is keyed by. Without one the internal
    /// UUID cannot be pre-seeded.
    pub fn addon_id(&self) -> Result<&str> {
        self.gecko_id().ok_or_else(|| {
            Error::ManifestError("manifest has no browser_specific_settings.gecko.id".into())
        })
    }

    /// Relative path of the options page
    pub fn options_page(&self) -> &str {
        self.options_ui
            .as_ref()
            .and_then(|o| o.page.as_deref())
            .unwrap_or("options.html")
    }

    /// Relative path of the toolbar popup
    pub fn popup_page(&self) -> &str {
        self.action
            .as_ref()
            .or(self.browser_action.as_ref())
            .and_then(|a| a.default_popup.as_deref())
            .unwrap_or("popup.html")
    }

    /// File name of the packaged extension for this version
    pub fn package_name(&self) -> String {
        format!("referer-mod-{}.zip", self.version)
    }

    /// Where the build puts the package inside `extension_dir`
    pub fn package_path(&self, extension_dir: &Path) -> PathBuf {
        extension_dir.join(self.package_name())
    }
}

/// Internal UUID Firefox uses in `moz-extension://` URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionUuid(Uuid);

impl ExtensionUuid {
    /// A fresh random (v4) UUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw.trim())
            .map(Self)
            .map_err(|e| Error::ConfigError(format!("invalid extension UUID '{}': {}", raw, e)))
    }

    /// URL of a page bundled with the extension
    pub fn page_url(&self, page: &str) -> String {
        format!("moz-extension://{}/{}", self.0, page.trim_start_matches('/'))
    }
}

impl fmt::Display for ExtensionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// SHA-256 of the package file, hex encoded. Recorded in reports so a run
/// can be tied to the exact build it tested.
pub fn package_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| {
        Error::ManifestError(format!(
            "Failed to read extension package {}: {} (build the extension first)",
            path.display(),
            e
        ))
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "manifest_version": 2,
        "name": "Referer Modifier",
        "version": "0.9.1",
        "browser_specific_settings": { "gecko": { "id": "referer-mod@example.org" } },
        "options_ui": { "page": "options.html" },
        "browser_action": { "default_popup": "popup.html" }
    }"#;

    #[test]
    fn test_manifest_metadata() {
        let m = Manifest::from_json(MANIFEST).unwrap();
        assert_eq!(m.version, "0.9.1");
        assert_eq!(m.gecko_id(), Some("referer-mod@example.org"));
        assert_eq!(m.addon_id().unwrap(), "referer-mod@example.org");
        assert_eq!(m.options_page(), "options.html");
        assert_eq!(m.popup_page(), "popup.html");
        assert_eq!(m.package_name(), "referer-mod-0.9.1.zip");
        assert_eq!(m.package_path(Path::new("/src/refmod")), PathBuf::from("/src/refmod/referer-mod-0.9.1.zip"));
    }

    #[test]
    fn test_manifest_requires_version() {
        assert!(Manifest::from_json(r#"{"name": "x"}"#).is_err());
        assert!(Manifest::from_json(r#"{"version": " "}"#).is_err());
    }

    #[test]
    fn test_addon_id_is_required_for_seeding() {
        let m = Manifest::from_json(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(m.gecko_id(), None);
        assert!(matches!(m.addon_id(), Err(Error::ManifestError(_))));

        let m = Manifest::from_json(r#"{"version": "1.0", "browser_specific_settings": {"gecko": {"id": ""}}}"#).unwrap();
        assert!(m.addon_id().is_err());
    }

    #[test]
    fn test_page_url() {
        let uuid = ExtensionUuid::parse("0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99").unwrap();
        assert_eq!(
            uuid.page_url("/options.html"),
            "moz-extension://0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99/options.html"
        );
        assert_eq!(uuid.to_string(), "0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99");
    }

    #[test]
    fn test_generated_uuids_differ() {
        assert_ne!(ExtensionUuid::generate(), ExtensionUuid::generate());
        assert!(ExtensionUuid::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_package_checksum() {
        let dir = std::env::temp_dir().join(format!("refmod-pkg-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("referer-mod-1.0.zip");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            package_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(package_sha256(&path), Err(Error::ManifestError(_))));
    }
}
