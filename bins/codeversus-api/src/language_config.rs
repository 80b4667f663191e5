// Language configuration management
// Reads the enabled languages from languages.json

use anyhow::{bail, Context, Result};
use codeversus_common::types::Language;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// The API only needs the language tags; the worker owns the rest of the table
#[derive(Debug, Deserialize)]
struct LanguageEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageEntry>,
}

/// Registry of configured languages
/// This is the authoritative source for which languages are enabled
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    enabled_languages: BTreeSet<Language>,
}

impl LanguageRegistry {
    /// Load language configuration from languages.json
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: LanguagesFile =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut enabled_languages = BTreeSet::new();
        for entry in &config.languages {
            let language: Language = entry
                .name
                .parse()
                .with_context(|| format!("Unknown language '{}' in languages.json", entry.name))?;
            enabled_languages.insert(language);
        }

        if enabled_languages.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self { enabled_languages })
    }

    /// Check if a language is enabled
    pub fn is_enabled(&self, language: Language) -> bool {
        self.enabled_languages.contains(&language)
    }

    /// Get all enabled languages
    pub fn enabled_languages(&self) -> Vec<Language> {
        self.enabled_languages.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_json() {
        let registry = LanguageRegistry::from_json(
            r#"{"languages": [{"name": "python", "image": "python:3.12-slim"}, {"name": "cpp"}]}"#,
        )
        .unwrap();
        assert!(registry.is_enabled(Language::Python));
        assert!(!registry.is_enabled(Language::Java));
        assert_eq!(registry.enabled_languages(), vec![Language::Cpp, Language::Python]);
    }

    #[test]
    fn test_registry_rejects_unknown_or_empty() {
        assert!(LanguageRegistry::from_json(r#"{"languages": [{"name": "cobol"}]}"#).is_err());
        assert!(LanguageRegistry::from_json(r#"{"languages": []}"#).is_err());
    }

    #[test]
    fn test_language_registry() {
        // This test assumes languages.json exists in config/
        let registry = LanguageRegistry::load_from_file("../../config/languages.json");
        assert!(registry.is_ok());

        if let Ok(reg) = registry {
            assert!(reg.is_enabled(Language::Python));
            assert!(reg.is_enabled(Language::Cpp));
        }
    }
}
