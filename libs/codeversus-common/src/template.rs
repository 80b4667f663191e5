/// Submission Assembler
///
/// A `Template` is per-problem, per-language boilerplate with a single
/// insertion point. The marker count is checked once, when the template is
/// constructed, so every `Template` value in the system is well-formed and
/// assembling never has to re-scan for malformed content.
///
/// Assembly is a pure string splice: the marker is replaced verbatim by the
/// user code and every other byte of the scaffold is preserved.
use serde::Serialize;

use crate::error::{JudgeError, Result};
use crate::types::Language;

/// Marker the boilerplate uses for the user's code
pub const PLACEHOLDER: &str = "##USER_CODE_HERE##";

/// Upper bound on submitted code, checked before anything reaches a sandbox
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    language: Language,
    source: String,
}

impl Template {
    /// Validate and wrap template text.
    ///
    /// Fails with `TemplateMalformed` unless the marker occurs exactly once.
    pub fn new(language: Language, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let found = source.matches(PLACEHOLDER).count();
        if found != 1 {
            return Err(JudgeError::TemplateMalformed {
                language: language.to_string(),
                found,
            });
        }
        Ok(Self { language, source })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Splice user code into the scaffold
    pub fn assemble(&self, user_code: &str) -> Result<String> {
        if user_code.trim().is_empty() {
            return Err(JudgeError::EmptyCode);
        }
        if user_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(JudgeError::SourceTooLarge {
                size: user_code.len(),
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        Ok(self.source.replacen(PLACEHOLDER, user_code, 1))
    }
}

/// Validate raw template text and assemble in one step
pub fn assemble(language: Language, template: &str, user_code: &str) -> Result<String> {
    Template::new(language, template)?.assemble(user_code)
}
