//! Prompt template files on disk
//!
//! Layout: `<root>/<method>/system.txt` and `<root>/<method>/user.txt`, with
//! optional per-stage variants such as `system_2.txt` and `user_2.txt`.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prompt loading errors
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("{role} prompt not found for method '{method}': {}", .path.display())]
    NotFound {
        method: String,
        role: &'static str,
        path: PathBuf,
    },

    #[error("Failed to read prompt file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// System and user templates for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// Optional templates for one stage; `None` means the file does not exist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePrompts {
    pub system: Option<String>,
    pub user: Option<String>,
}

/// Reads method templates from a prompts directory
#[derive(Debug, Clone)]
pub struct PromptStore {
    root: PathBuf,
}

impl PromptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a method's templates
    pub fn method_dir(&self, method: &str) -> PathBuf {
        self.root.join(method)
    }

    /// Load the required `system.txt` / `user.txt` pair for a method
    pub fn load_pair(&self, method: &str) -> Result<PromptPair, PromptError> {
        let dir = self.method_dir(method);
        let system = read_required(method, "System", &dir.join("system.txt"))?;
        let user = read_required(method, "User", &dir.join("user.txt"))?;
        Ok(PromptPair { system, user })
    }

    /// Load `system{suffix}.txt` / `user{suffix}.txt`, either of which may be absent
    pub fn load_stage(&self, method: &str, suffix: &str) -> Result<StagePrompts, PromptError> {
        let dir = self.method_dir(method);
        Ok(StagePrompts {
            system: read_optional(&dir.join(format!("system{}.txt", suffix)))?,
            user: read_optional(&dir.join(format!("user{}.txt", suffix)))?,
        })
    }
}

fn read_required(method: &str, role: &'static str, path: &Path) -> Result<String, PromptError> {
    read_optional(path)?.ok_or_else(|| PromptError::NotFound {
        method: method.to_string(),
        role,
        path: path.to_path_buf(),
    })
}

/// Only a missing file counts as absent; every other I/O failure is an error.
fn read_optional(path: &Path) -> Result<Option<String>, PromptError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(PromptError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
