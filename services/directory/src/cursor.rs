//! Opaque pagination cursors.
//!
//! A cursor wraps the store's continuation key as `base64url(JSON)` with a
//! version tag, so callers never see or depend on the key's structure.
//! Decoding validates shape and rejects anything that did not come from
//! [`Cursor::encode`].

use crate::store::StoreKey;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CURSOR_VERSION: u8 = 1;

/// Reasons a cursor token cannot be turned back into a store key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64url")]
    Encoding,

    #[error("cursor payload is malformed: {0}")]
    Payload(String),

    #[error("unsupported cursor version {0}")]
    Version(u8),

    #[error("cursor does not address this table: {0}")]
    Shape(String),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CursorPayload {
    v: u8,
    key: StoreKey,
}

/// Transport-safe token meaning "resume scanning after this key".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token received from a caller. No validation happens until
    /// [`Cursor::decode`].
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn encode(key: &StoreKey) -> Result<Self, CursorError> {
        let payload = CursorPayload {
            v: CURSOR_VERSION,
            key: key.clone(),
        };
        let json =
            serde_json::to_vec(&payload).map_err(|e| CursorError::Payload(e.to_string()))?;
        Ok(Self(URL_SAFE_NO_PAD.encode(json)))
    }

    pub fn decode(&self) -> Result<StoreKey, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| CursorError::Encoding)?;

        let payload: CursorPayload =
            serde_json::from_slice(&bytes).map_err(|e| CursorError::Payload(e.to_string()))?;

        if payload.v != CURSOR_VERSION {
            return Err(CursorError::Version(payload.v));
        }

        if payload.key.is_empty() {
            return Err(CursorError::Payload("key has no attributes".to_string()));
        }

        Ok(payload.key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_token(self) -> String {
        self.0
    }
}
