//! Session context: identity and credential for one user
//!
//! An explicit object passed to the collaboration module at construction,
//! with explicit load/save lifecycle — credentials and the cached signature
//! reference live here, not in ambient storage read from scattered
//! handlers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ParleyError, Result};

/// Identity, bearer credential and per-user cached state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub display_name: String,
    /// Bearer credential presented to the REST backend and the channel
    pub token: String,
    /// Signature reference from a previous upload, reusable across
    /// agreements by the same user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_signature: Option<String>,
}

impl SessionContext {
    pub fn new(user_id: &str, display_name: &str, token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            token: token.to_string(),
            cached_signature: None,
        }
    }

    /// Load a context from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ParleyError::Config(format!("Cannot read session context {}: {e}", path.display()))
        })?;
        let ctx: Self = serde_json::from_str(&data)?;
        if ctx.token.is_empty() {
            return Err(ParleyError::Auth("Session context has no token".into()));
        }
        debug!(user_id = %ctx.user_id, "Session context loaded");
        Ok(ctx)
    }

    /// Persist the context, including any cached signature reference.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(|e| {
            ParleyError::Config(format!(
                "Cannot write session context {}: {e}",
                path.display()
            ))
        })
    }

    /// Remember a signature reference for reuse on future agreements.
    pub fn cache_signature(&mut self, reference: &str) {
        self.cached_signature = Some(reference.to_string());
    }
}
