//! Provider credentials.
//!
//! A [`Credentials`] value is a snapshot of the known provider variables,
//! taken once at startup. The process environment wins over `home/.env`.
//! Values are never logged or serialized.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Every variable a built-in provider may need
pub const KNOWN_VARIABLES: &[&str] = &[
    "GOOGLE_API_KEY_GEMINI",
    "OPENAI_API_KEY",
    "PEXELS_API_KEY",
    "ELEVENLABS_API_KEY",
    "FAL_KEY",
];

#[derive(Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("present", &self.present())
            .finish()
    }
}

impl Credentials {
    /// Explicit credentials, mostly for tests
    pub fn with(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.values.insert(var.into(), value);
        }
        self
    }

    /// Snapshot the process environment, then fill gaps from `home/.env`
    pub fn load(home: &Path) -> Result<Self> {
        let mut credentials = Self::default();

        for var in KNOWN_VARIABLES {
            if let Ok(value) = std::env::var(var) {
                credentials = credentials.with(*var, value);
            }
        }

        let env_file = home.join(".env");
        if env_file.exists() {
            let content = std::fs::read_to_string(&env_file)
                .with_context(|| format!("Failed to read {}", env_file.display()))?;
            for (var, value) in parse_env_file(&content) {
                if KNOWN_VARIABLES.contains(&var.as_str()) && credentials.get(&var).is_none() {
                    credentials = credentials.with(var, value);
                }
            }
        }

        debug!(present = ?credentials.present(), "Loaded credentials");
        Ok(credentials)
    }

    /// Non-empty value for a variable
    pub fn get(&self, var: &str) -> Option<&str> {
        self.values.get(var).map(String::as_str)
    }

    /// Names of the variables that have a value, sorted
    pub fn present(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parse `KEY=value` lines (comments, `export` and quotes tolerated)
fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file(
            "# keys\nexport PEXELS_API_KEY=\"abc\"\nFAL_KEY='k:1'\n\nBROKEN\nOPENAI_API_KEY = sk-1\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("PEXELS_API_KEY".to_string(), "abc".to_string()),
                ("FAL_KEY".to_string(), "k:1".to_string()),
                ("OPENAI_API_KEY".to_string(), "sk-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_values_are_absent() {
        let credentials = Credentials::default()
            .with("PEXELS_API_KEY", "  ")
            .with("FAL_KEY", "k");
        assert_eq!(credentials.get("PEXELS_API_KEY"), None);
        assert_eq!(credentials.present(), ["FAL_KEY"]);
    }

    #[test]
    fn test_debug_never_prints_values() {
        let credentials = Credentials::default().with("OPENAI_API_KEY", "sk-secret");
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("OPENAI_API_KEY"));
        assert!(!rendered.contains("sk-secret"));
    }

    #[test]
    fn test_env_file_fills_gaps() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join(".env"), "ELEVENLABS_API_KEY=from-file\nOTHER=x\n").unwrap();

        let credentials = Credentials::load(temp.path()).unwrap();
        // Only known variables are picked up
        assert!(!credentials.present().contains(&"OTHER"));
        if std::env::var("ELEVENLABS_API_KEY").is_err() {
            assert_eq!(credentials.get("ELEVENLABS_API_KEY"), Some("from-file"));
        }
    }
}
