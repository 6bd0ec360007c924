// Token persistence backends
//
// The token is the only state that survives a restart. The file backend keeps
// it in a small JSON document; the memory backend is for tests and for
// embedding without persistence.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::traits::TokenPersistence;

// ============================================================================
// MemoryTokenStore
// ============================================================================

/// Token persistence that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with a token (useful for testing)
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenPersistence for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>, SessionError> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> Result<(), SessionError> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.token.lock().take();
        Ok(())
    }
}

// ============================================================================
// FileTokenStore
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
}

/// Token persistence in a JSON file, e.g. `~/.keypanel/token.json`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenPersistence for FileTokenStore {
    fn load(&self) -> Result<Option<String>, SessionError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let file: TokenFile = serde_json::from_str(&content)?;
        Ok(Some(file.access_token).filter(|t| !t.is_empty()))
    }

    fn save(&self, token: &str) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&TokenFile {
            access_token: token.to_string(),
        })?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
