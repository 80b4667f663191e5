// Per-submission scratch directories

use codeversus_common::JudgeError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LanguageConfig;

/// Host directories for one submission.
///
/// `code/` holds the assembled source and build artifacts and is the only
/// directory a run can see. `io/` holds per-run stdin files and stays outside
/// the program's filesystem view. Both are removed on drop.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    code_dir: PathBuf,
    io_dir: PathBuf,
}

impl Workspace {
    pub async fn create(
        base: &Path,
        submission_id: Uuid,
        language: &LanguageConfig,
        source: &str,
    ) -> Result<Self, JudgeError> {
        let root = base.join(submission_id.to_string());
        let code_dir = root.join("code");
        let io_dir = root.join("io");

        for dir in [&code_dir, &io_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| setup_error(dir, e))?;
        }

        let source_path = code_dir.join(&language.source_file);
        tokio::fs::write(&source_path, source)
            .await
            .map_err(|e| setup_error(&source_path, e))?;

        debug!(workspace = %root.display(), "Created submission workspace");
        Ok(Self {
            root,
            code_dir,
            io_dir,
        })
    }

    pub fn code_dir(&self) -> &Path {
        &self.code_dir
    }

    /// Write stdin for one run to a uniquely named file under `io/`
    pub async fn write_input(&self, input: &str) -> Result<PathBuf, JudgeError> {
        let path = self.io_dir.join(format!("{}.in", Uuid::new_v4()));
        tokio::fs::write(&path, input)
            .await
            .map_err(|e| setup_error(&path, e))?;
        Ok(path)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            warn!(workspace = %self.root.display(), error = %e, "Failed to remove workspace");
        }
    }
}

fn setup_error(path: &Path, err: std::io::Error) -> JudgeError {
    JudgeError::SandboxSetup(format!("workspace {}: {}", path.display(), err))
}
