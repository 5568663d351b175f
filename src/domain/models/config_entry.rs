use std::path::PathBuf;

use serde::Deserialize;

use crate::domain::models::HostAddress;

const IP_PLACEHOLDER: &str = "{ip}";

/// A single `key=value` line destined for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub file: PathBuf,
    pub key: String,
    pub value: String,
}

/// Config entry whose value may reference the probed address as `{ip}`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryTemplate {
    pub file: PathBuf,
    pub key: String,
    pub value: String,
}

impl EntryTemplate {
    pub fn new(file: impl Into<PathBuf>, key: &str, value: &str) -> Self {
        Self {
            file: file.into(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn render(&self, address: &HostAddress) -> ConfigEntry {
        ConfigEntry {
            file: self.file.clone(),
            key: self.key.clone(),
            value: self.value.replace(IP_PLACEHOLDER, &address.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_every_placeholder() {
        let template = EntryTemplate::new(".env", "CORS", "http://{ip}:8000,http://{ip}:5173");
        let entry = template.render(&"192.168.0.7".parse().unwrap());
        assert_eq!(entry.value, "http://192.168.0.7:8000,http://192.168.0.7:5173");
        assert_eq!(entry.key, "CORS");
        assert_eq!(entry.file, PathBuf::from(".env"));
    }

    #[test]
    fn test_render_without_placeholder_is_verbatim() {
        let template = EntryTemplate::new(".env", "APP_ENV", "local");
        assert_eq!(template.render(&HostAddress::FALLBACK).value, "local");
    }
}
