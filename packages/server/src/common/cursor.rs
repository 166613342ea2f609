//! Opaque cursor tokens for paginated views.
//!
//! A cursor encodes the last-seen key of one of the three ordered views
//! (items, decisions, exports) together with an issue timestamp, and is
//! signed with a process-wide secret so clients cannot forge positions or
//! replay a cursor against a different view.
//!
//! Token layout: `base64url(payload_json) . base64url(hmac_sha256_tag)`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// How long an issued cursor stays decodable.
pub const CURSOR_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

const CURSOR_VERSION: u8 = 1;

/// The ordered view a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorView {
    Items,
    Decisions,
    Exports,
}

/// The last-seen key tuple of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorKey {
    /// `(sort_key, item_id)`, ascending.
    Items { sort_key: String, item_id: Uuid },
    /// `(ts_server, item_id)`, ascending.
    Decisions { ts_server: i64, item_id: Uuid },
    /// `(created_at millis, id)`, descending.
    Exports { created_at: i64, id: Uuid },
}

impl CursorKey {
    fn view(&self) -> CursorView {
        match self {
            CursorKey::Items { .. } => CursorView::Items,
            CursorKey::Decisions { .. } => CursorView::Decisions,
            CursorKey::Exports { .. } => CursorView::Exports,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("invalid cursor")]
    Invalid,
    #[error("expired cursor")]
    Expired,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    v: u8,
    view: CursorView,
    /// Key fields, view-specific. Items: [sort_key, item_id].
    /// Decisions: [ts_server, item_id]. Exports: [created_at, id].
    k: (serde_json::Value, String),
    iat: i64,
}

/// Encoder/decoder bound to the process-wide cursor secret.
#[derive(Clone)]
pub struct CursorCodec {
    secret: Vec<u8>,
}

impl CursorCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn encode(&self, key: &CursorKey, now_ms: i64) -> String {
        let k = match key {
            CursorKey::Items { sort_key, item_id } => {
                (serde_json::Value::from(sort_key.clone()), item_id.to_string())
            }
            CursorKey::Decisions { ts_server, item_id } => {
                (serde_json::Value::from(*ts_server), item_id.to_string())
            }
            CursorKey::Exports { created_at, id } => {
                (serde_json::Value::from(*created_at), id.to_string())
            }
        };
        let payload = Payload {
            v: CURSOR_VERSION,
            view: key.view(),
            k,
            iat: now_ms,
        };
        // Payload is a plain struct; serialization cannot fail.
        let bytes = serde_json::to_vec(&payload).expect("cursor payload serializes");
        let tag = self.sign(&bytes);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&bytes),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    /// Decode a token previously issued for `view`.
    ///
    /// Any structural problem, signature mismatch, or view mismatch is
    /// `Invalid`; a token older than [`CURSOR_TTL_MS`] is `Expired`. Both
    /// surface to clients as `400 invalid_cursor`.
    pub fn decode(
        &self,
        view: CursorView,
        token: &str,
        now_ms: i64,
    ) -> Result<CursorKey, CursorError> {
        let (payload_b64, tag_b64) = token.split_once('.').ok_or(CursorError::Invalid)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| CursorError::Invalid)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| CursorError::Invalid)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(&bytes);
        mac.verify_slice(&tag).map_err(|_| CursorError::Invalid)?;

        let payload: Payload = serde_json::from_slice(&bytes).map_err(|_| CursorError::Invalid)?;
        if payload.v != CURSOR_VERSION || payload.view != view {
            return Err(CursorError::Invalid);
        }
        if now_ms.saturating_sub(payload.iat) > CURSOR_TTL_MS {
            return Err(CursorError::Expired);
        }

        let item_id = Uuid::parse_str(&payload.k.1).map_err(|_| CursorError::Invalid)?;
        match view {
            CursorView::Items => {
                let sort_key = payload.k.0.as_str().ok_or(CursorError::Invalid)?.to_string();
                Ok(CursorKey::Items { sort_key, item_id })
            }
            CursorView::Decisions => {
                let ts_server = payload.k.0.as_i64().ok_or(CursorError::Invalid)?;
                Ok(CursorKey::Decisions { ts_server, item_id })
            }
            CursorView::Exports => {
                let created_at = payload.k.0.as_i64().ok_or(CursorError::Invalid)?;
                Ok(CursorKey::Exports {
                    created_at,
                    id: item_id,
                })
            }
        }
    }

    fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(bytes);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> CursorCodec {
        CursorCodec::new(b"test-secret".to_vec())
    }

    #[test]
    fn roundtrip_items() {
        let key = CursorKey::Items {
            sort_key: "0042".into(),
            item_id: Uuid::new_v4(),
        };
        let token = codec().encode(&key, 1_000);
        let decoded = codec().decode(CursorView::Items, &token, 2_000).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn roundtrip_decisions_and_exports() {
        let id = Uuid::new_v4();
        let key = CursorKey::Decisions {
            ts_server: 123_456,
            item_id: id,
        };
        let token = codec().encode(&key, 0);
        assert_eq!(codec().decode(CursorView::Decisions, &token, 0).unwrap(), key);

        let key = CursorKey::Exports {
            created_at: 999,
            id,
        };
        let token = codec().encode(&key, 0);
        assert_eq!(codec().decode(CursorView::Exports, &token, 0).unwrap(), key);
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let key = CursorKey::Items {
            sort_key: "a".into(),
            item_id: Uuid::new_v4(),
        };
        let token = codec().encode(&key, 0);
        let (payload, tag) = token.split_once('.').unwrap();
        let mut forged = payload.to_string();
        forged.replace_range(0..1, if payload.starts_with('A') { "B" } else { "A" });
        let forged = format!("{}.{}", forged, tag);
        assert_eq!(
            codec().decode(CursorView::Items, &forged, 0),
            Err(CursorError::Invalid)
        );
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let key = CursorKey::Items {
            sort_key: "a".into(),
            item_id: Uuid::new_v4(),
        };
        let token = CursorCodec::new(b"other".to_vec()).encode(&key, 0);
        assert_eq!(
            codec().decode(CursorView::Items, &token, 0),
            Err(CursorError::Invalid)
        );
    }

    #[test]
    fn view_mismatch_is_invalid() {
        let key = CursorKey::Decisions {
            ts_server: 1,
            item_id: Uuid::new_v4(),
        };
        let token = codec().encode(&key, 0);
        assert_eq!(
            codec().decode(CursorView::Items, &token, 0),
            Err(CursorError::Invalid)
        );
    }

    #[test]
    fn old_cursor_expires() {
        let key = CursorKey::Items {
            sort_key: "a".into(),
            item_id: Uuid::new_v4(),
        };
        let issued = 1_000_000_000_000;
        let token = codec().encode(&key, issued);
        let eight_days = 8 * 24 * 60 * 60 * 1000;
        assert_eq!(
            codec().decode(CursorView::Items, &token, issued + eight_days),
            Err(CursorError::Expired)
        );
        // One day short of the TTL still decodes.
        assert!(codec()
            .decode(CursorView::Items, &token, issued + eight_days - 2 * 24 * 60 * 60 * 1000)
            .is_ok());
    }

    #[test]
    fn garbage_is_invalid() {
        for token in ["", "x", "a.b", "!!!.???"] {
            assert_eq!(
                codec().decode(CursorView::Items, token, 0),
                Err(CursorError::Invalid)
            );
        }
    }
}
