// Language table and worker settings for CodeVersus Worker
use anyhow::{bail, Context, Result};
use codeversus_common::config::JudgeDefaults;
use codeversus_common::types::Language;
use codeversus_common::JudgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Substituted with the sandbox's view of the submission workspace
pub const WORKDIR_VAR: &str = "{workdir}";

fn default_compile_memory_mb() -> u64 {
    512
}

fn default_cpu_limit() -> f32 {
    1.0
}

/// Per-language scaffold data: image, file layout, build and run commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub version: String,
    pub image: String,
    /// File the assembled source is written to, relative to the workspace
    pub source_file: String,
    /// Build step; absent for interpreted languages
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    pub memory_limit_mb: u64,
    #[serde(default = "default_compile_memory_mb")]
    pub compile_memory_mb: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
}

impl LanguageConfig {
    pub fn compile_command(&self, workdir: &str) -> Option<Vec<String>> {
        self.compile.as_ref().map(|cmd| substitute(cmd, workdir))
    }

    pub fn run_command(&self, workdir: &str) -> Vec<String> {
        substitute(&self.run, workdir)
    }
}

fn substitute(cmd: &[String], workdir: &str) -> Vec<String> {
    cmd.iter().map(|arg| arg.replace(WORKDIR_VAR, workdir)).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
///
/// Loaded once at startup and never mutated; shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;

        let languages_json: LanguagesJson =
            serde_json::from_str(&content).context("Failed to parse languages.json")?;

        let configs = Self::from_configs(languages_json.languages)?;
        if configs.configs.is_empty() {
            bail!("No languages configured in {}", config_path.display());
        }
        Ok(configs)
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new("config/languages.json"))
    }

    pub fn from_configs(languages: Vec<LanguageConfig>) -> Result<Self> {
        let mut configs = HashMap::new();
        for lang in languages {
            if lang.run.is_empty() {
                bail!("Language '{}' has an empty run command", lang.name);
            }
            if lang.compile.as_ref().is_some_and(|cmd| cmd.is_empty()) {
                bail!("Language '{}' has an empty compile command", lang.name);
            }
            if configs.insert(lang.name, lang).is_some() {
                bail!("Language configured twice in languages.json");
            }
        }
        Ok(Self { configs })
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> Result<&LanguageConfig, JudgeError> {
        self.configs
            .get(&language)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language.to_string()))
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort();
        languages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Docker,
    Process,
}

/// Worker process settings, read from the environment
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub problems_dir: PathBuf,
    pub languages_path: PathBuf,
    pub workspace_root: PathBuf,
    pub backend: Backend,
    /// Submissions judged concurrently by this process
    pub worker_slots: usize,
    /// Sandbox pool capacity shared by all submissions
    pub sandbox_slots: usize,
    pub max_parallel_tests: usize,
    pub stop_on_first_failure: bool,
    pub setup_retries: u32,
    pub compile_timeout: Duration,
    pub cancel_poll_interval: Duration,
    pub json_logs: bool,
    pub defaults: JudgeDefaults,
}

impl WorkerSettings {
    pub fn from_env() -> Result<Self> {
        let backend = match env_or("SANDBOX_BACKEND", "docker".to_string()).to_lowercase().as_str() {
            "docker" => Backend::Docker,
            "process" => Backend::Process,
            other => bail!("Invalid SANDBOX_BACKEND '{}' (valid: docker, process)", other),
        };

        let settings = Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379".to_string()),
            problems_dir: PathBuf::from(env_or("PROBLEMS_DIR", "problems".to_string())),
            languages_path: PathBuf::from(env_or(
                "LANGUAGES_CONFIG",
                "config/languages.json".to_string(),
            )),
            workspace_root: PathBuf::from(env_or(
                "WORKSPACE_ROOT",
                std::env::temp_dir().join("codeversus").display().to_string(),
            )),
            backend,
            worker_slots: env_or("WORKER_SLOTS", 2),
            sandbox_slots: env_or("SANDBOX_SLOTS", 4),
            max_parallel_tests: env_or("MAX_PARALLEL_TESTS", 4),
            stop_on_first_failure: env_or("STOP_ON_FIRST_FAILURE", false),
            setup_retries: env_or("SANDBOX_SETUP_RETRIES", 3),
            compile_timeout: Duration::from_millis(env_or("COMPILE_TIMEOUT_MS", 30_000)),
            cancel_poll_interval: Duration::from_millis(env_or("CANCEL_POLL_MS", 250)),
            json_logs: env_or("LOG_FORMAT", "text".to_string()) == "json",
            defaults: JudgeDefaults::from_env(),
        };

        if settings.worker_slots == 0 || settings.sandbox_slots == 0 || settings.max_parallel_tests == 0 {
            bail!("WORKER_SLOTS, SANDBOX_SLOTS and MAX_PARALLEL_TESTS must be at least 1");
        }
        Ok(settings)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LANGUAGES: &str = r#"{
        "languages": [
            {
                "name": "cpp",
                "version": "13",
                "image": "gcc:13",
                "source_file": "main.cpp",
                "compile": ["g++", "-O2", "-o", "{workdir}/main", "{workdir}/main.cpp"],
                "run": ["{workdir}/main"],
                "memory_limit_mb": 256
            },
            {
                "name": "python",
                "version": "3.12",
                "image": "python:3.12-slim",
                "source_file": "main.py",
                "run": ["python3", "{workdir}/main.py"],
                "memory_limit_mb": 128,
                "cpu_limit": 0.5
            }
        ]
    }"#;

    fn manager() -> LanguageConfigManager {
        let json: LanguagesJson = serde_json::from_str(LANGUAGES).unwrap();
        LanguageConfigManager::from_configs(json.languages).unwrap()
    }

    #[test]
    fn test_parse_language_table() {
        let manager = manager();
        assert_eq!(manager.list_languages(), vec![Language::Cpp, Language::Python]);

        let cpp = manager.get_config(Language::Cpp).unwrap();
        assert_eq!(cpp.compile_memory_mb, 512);
        assert_eq!(cpp.cpu_limit, 1.0);

        let python = manager.get_config(Language::Python).unwrap();
        assert!(python.compile.is_none());
        assert_eq!(python.cpu_limit, 0.5);
    }

    #[test]
    fn test_workdir_substitution() {
        let manager = manager();
        let cpp = manager.get_config(Language::Cpp).unwrap();

        assert_eq!(
            cpp.compile_command("/code").unwrap(),
            vec!["g++", "-O2", "-o", "/code/main", "/code/main.cpp"]
        );
        assert_eq!(cpp.run_command("/tmp/ws"), vec!["/tmp/ws/main"]);
    }

    #[test]
    fn test_unconfigured_language() {
        let manager = manager();
        assert_eq!(
            manager.get_config(Language::Java).unwrap_err(),
            JudgeError::UnsupportedLanguage("java".to_string())
        );
    }

    #[test]
    fn test_duplicate_language_rejected() {
        let json: LanguagesJson = serde_json::from_str(LANGUAGES).unwrap();
        let mut languages = json.languages;
        languages.push(languages[0].clone());
        assert!(LanguageConfigManager::from_configs(languages).is_err());
    }

    #[test]
    fn test_load_config() {
        // Only meaningful when run from a checkout with config/languages.json
        match LanguageConfigManager::load_default() {
            Ok(manager) => println!("Loaded languages: {:?}", manager.list_languages()),
            Err(e) => println!("Config not found (expected in test environment): {}", e),
        }
    }
}
