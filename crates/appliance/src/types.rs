//! Wire types for the appliance HTTP API.
//!
//! The login response's `token` field has shipped in several shapes
//! across firmware versions; [`TokenField`] models all of them instead
//! of assuming one schema.

use serde::Deserialize;

/// Login response body. The token may live under `data.token` or at the
/// top level depending on firmware.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub data: Option<LoginData>,
    /// Oldest firmware: token at the top level.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub token: Option<TokenField>,
}

/// The `token` field: either a bare string or an object carrying
/// `access_token` / `refresh_token`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TokenField {
    Plain(String),
    Object {
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default)]
        refresh_token: Option<String>,
    },
}

impl LoginResponse {
    /// Resolves the bearer token, trying `data.token` as a string, then
    /// `access_token`, then `refresh_token`, then the top-level `token`.
    pub fn resolve_token(&self) -> Option<&str> {
        if let Some(data) = &self.data {
            match &data.token {
                Some(TokenField::Plain(s)) if !s.is_empty() => return Some(s),
                Some(TokenField::Object {
                    access_token,
                    refresh_token,
                }) => {
                    if let Some(t) = access_token.as_deref().filter(|t| !t.is_empty()) {
                        return Some(t);
                    }
                    if let Some(t) = refresh_token.as_deref().filter(|t| !t.is_empty()) {
                        return Some(t);
                    }
                }
                _ => {}
            }
        }
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Metadata for one entry in a directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub size: i64,
    /// Unix timestamp.
    #[serde(default)]
    pub modified: i64,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub path: String,
}

/// Directory listing response.
#[derive(Debug, Deserialize)]
pub struct FileListResponse {
    #[serde(default)]
    pub content: Vec<FileMetadata>,
    #[serde(default)]
    pub total: i64,
}

/// One storage device reported by the appliance.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageDevice {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}
