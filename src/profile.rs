use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Personal details the agent may fill into forms. Stored as JSON next to
/// the config file and edited by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub favorite_restaurants: Vec<String>,
    pub preferred_payment_method: Option<String>,
    /// Contact name to phone number or email.
    pub contacts: BTreeMap<String, String>,
    pub custom_data: Map<String, Value>,
}

impl UserProfile {
    /// A missing file is an empty profile.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse user profile {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read user profile {}", path.display())),
        }
    }

    /// Looks `key` up among the named fields, then `custom_data`, then
    /// contact names. Empty values count as missing.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let key = normalize_key(key);
        if key.is_empty() {
            return None;
        }

        let fields = serde_json::to_value(self).ok()?;
        let named = fields
            .get(&key)
            .filter(|_| key != "custom_data" && key != "contacts")
            .cloned();
        let custom = || {
            self.custom_data
                .iter()
                .find(|(name, _)| normalize_key(name) == key)
                .map(|(_, value)| value.clone())
        };
        let contact = || {
            self.contacts
                .iter()
                .find(|(name, _)| normalize_key(name) == key)
                .map(|(_, value)| Value::String(value.clone()))
        };

        named
            .filter(is_present)
            .or_else(|| custom().filter(is_present))
            .or_else(|| contact().filter(is_present))
    }
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> UserProfile {
        serde_json::from_value(json!({
            "email": "ada@example.com",
            "city": "  ",
            "favorite_restaurants": ["Noma"],
            "contacts": { "Grace Hopper": "+1 555 0100" },
            "custom_data": { "Loyalty Number": "LN-42" }
        }))
        .unwrap()
    }

    #[test]
    fn finds_named_custom_and_contact_values() {
        let profile = profile();
        assert_eq!(profile.lookup("Email"), Some(json!("ada@example.com")));
        assert_eq!(profile.lookup("favorite restaurants"), Some(json!(["Noma"])));
        assert_eq!(profile.lookup("loyalty_number"), Some(json!("LN-42")));
        assert_eq!(profile.lookup("grace hopper"), Some(json!("+1 555 0100")));
    }

    #[test]
    fn blank_and_unknown_keys_are_missing() {
        let profile = profile();
        assert_eq!(profile.lookup("city"), None);
        assert_eq!(profile.lookup("phone"), None);
        assert_eq!(profile.lookup("shoe size"), None);
        assert_eq!(profile.lookup("contacts"), None);
        assert_eq!(profile.lookup(""), None);
    }

    #[test]
    fn missing_file_is_an_empty_profile() {
        let dir = tempfile::tempdir().unwrap();
        let profile = UserProfile::load(&dir.path().join("profile.json")).unwrap();
        assert_eq!(profile, UserProfile::default());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(UserProfile::load(&path).is_err());
    }
}
