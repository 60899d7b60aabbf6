//! Firefox profile preferences seeded before launch.

use crate::manifest::ExtensionUuid;
use serde_json::{json, Value};

/// Maps add-on IDs to the internal UUIDs of their `moz-extension://` pages
pub const PREF_WEBEXTENSION_UUIDS: &str = "extensions.webextensions.uuids";
pub const PREF_PROXY_TYPE: &str = "network.proxy.type";
pub const PREF_PROXY_HTTP: &str = "network.proxy.http";
pub const PREF_PROXY_HTTP_PORT: &str = "network.proxy.http_port";

/// `network.proxy.type` value for a manually configured proxy
const PROXY_MANUAL: i64 = 1;

/// Host the test server listens on
pub const PROXY_HOST: &str = "127.0.0.1";

/// The preference value is itself a JSON document, stored as a string.
pub fn uuid_map(addon_id: &str, uuid: &ExtensionUuid) -> String {
    json!({ addon_id: uuid.to_string() }).to_string()
}

/// Preferences that pin the extension UUID and send all HTTP traffic
/// through the test server on `proxy_port`.
pub fn seeded_prefs(addon_id: &str, uuid: &ExtensionUuid, proxy_port: u16) -> Vec<(&'static str, Value)> {
    vec![
        (PREF_WEBEXTENSION_UUIDS, Value::String(uuid_map(addon_id, uuid))),
        (PREF_PROXY_TYPE, json!(PROXY_MANUAL)),
        (PREF_PROXY_HTTP, json!(PROXY_HOST)),
        (PREF_PROXY_HTTP_PORT, json!(proxy_port)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid() -> ExtensionUuid {
        ExtensionUuid::parse("0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99").unwrap()
    }

    #[test]
    fn test_uuid_map_is_json_text() {
        let raw = uuid_map("referer-mod@example.org", &uuid());
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["referer-mod@example.org"], "0b7e4d3a-5b8c-4a57-9c3b-2f3e1d1c0a99");
    }

    #[test]
    fn test_seeded_prefs() {
        let prefs = seeded_prefs("referer-mod@example.org", &uuid(), 8080);
        let get = |key: &str| prefs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone());

        assert!(get(PREF_WEBEXTENSION_UUIDS).unwrap().is_string());
        assert_eq!(get(PREF_PROXY_TYPE), Some(json!(1)));
        assert_eq!(get(PREF_PROXY_HTTP), Some(json!("127.0.0.1")));
        assert_eq!(get(PREF_PROXY_HTTP_PORT), Some(json!(8080)));
    }
}
