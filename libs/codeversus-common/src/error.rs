//! Error taxonomy shared by the assembler, executor and judge.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, JudgeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JudgeError {
    /// Template does not contain exactly one placeholder marker
    #[error("template for {language} must contain exactly one ##USER_CODE_HERE## marker, found {found}")]
    TemplateMalformed { language: String, found: usize },

    /// Submitted code is empty or whitespace-only
    #[error("submitted code is empty")]
    EmptyCode,

    #[error("submitted code is {size} bytes, limit is {limit} bytes")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("compilation failed: {0}")]
    CompileError(String),

    #[error("execution exceeded the {limit_ms}ms wall-clock limit")]
    SandboxTimeout { limit_ms: u64 },

    #[error("execution was killed after exceeding the {limit_mb}MB memory limit")]
    SandboxKilled { limit_mb: u64 },

    /// Sandbox infrastructure failure (image pull, container create, spawn)
    #[error("sandbox setup failed: {0}")]
    SandboxSetup(String),

    #[error("unknown comparison policy '{0}'")]
    ComparisonPolicyUnknown(String),

    #[error("unknown problem '{0}'")]
    UnknownProblem(String),

    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    #[error("failed to load {path}: {reason}")]
    ContentLoad { path: String, reason: String },

    /// Execution was abandoned because the submission was cancelled
    #[error("execution cancelled")]
    Cancelled,
}

impl JudgeError {
    /// Structural errors reject the submission outright; retrying cannot help.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            JudgeError::TemplateMalformed { .. }
                | JudgeError::EmptyCode
                | JudgeError::SourceTooLarge { .. }
                | JudgeError::ComparisonPolicyUnknown(_)
                | JudgeError::UnknownProblem(_)
                | JudgeError::UnsupportedLanguage(_)
        )
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, JudgeError::SandboxSetup(_) | JudgeError::ContentLoad { .. })
    }
}
