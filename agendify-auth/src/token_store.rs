use crate::common::TokenPair;
use crate::error::AuthError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Single-slot holder for the current token pair.
///
/// Starts empty. Every `set` replaces the whole pair, so readers observe
/// either the old or the new value and never a mix of the two. When a
/// backing file is configured the pair is also written there so it survives
/// a restart.
pub struct TokenStore {
    current: RwLock<Option<TokenPair>>,
    token_path: Option<PathBuf>,
}

impl TokenStore {
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(None),
            token_path: None,
        }
    }

    /// Open a file-backed store, loading a previously saved pair if present.
    pub fn persistent(token_path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let token_path = token_path.into();

        if let Some(parent) = token_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    AuthError::TokenStorage(format!("Failed to create token directory: {}", e))
                })?;
            }
        }

        let current = load_token(&token_path)?;
        if current.is_some() {
            tracing::info!(path = %token_path.display(), "Loaded stored tokens");
        }

        Ok(Self {
            current: RwLock::new(current),
            token_path: Some(token_path),
        })
    }

    pub fn get(&self) -> Option<TokenPair> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Like `get`, but turns the empty slot into `AuthError::NotAuthorized`.
    pub fn require(&self) -> Result<TokenPair, AuthError> {
        self.get().ok_or(AuthError::NotAuthorized)
    }

    pub fn is_authorized(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Replace the stored pair. The in-memory value is always updated; an
    /// error means only the file write failed.
    pub fn set(&self, tokens: TokenPair) -> Result<(), AuthError> {
        let persisted = tokens.clone();
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokens);

        match &self.token_path {
            Some(path) => save_token(path, &persisted),
            None => Ok(()),
        }
    }
}

fn load_token(path: &Path) -> Result<Option<TokenPair>, AuthError> {
    if !path.exists() {
        return Ok(None);
    }

    let json = fs::read_to_string(path)
        .map_err(|e| AuthError::TokenStorage(format!("Failed to read token: {}", e)))?;

    let token: TokenPair = serde_json::from_str(&json)?;
    Ok(Some(token))
}

fn save_token(path: &Path, token: &TokenPair) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(token)?;

    fs::write(path, json)
        .map_err(|e| AuthError::TokenStorage(format!("Failed to save token: {}", e)))?;

    // Owner read/write only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .map_err(|e| AuthError::TokenStorage(format!("Failed to get file permissions: {}", e)))?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms).map_err(|e| {
            AuthError::TokenStorage(format!("Failed to set file permissions: {}", e))
        })?;
    }

    Ok(())
}
