//! Storage resolution: logical media URIs to short-lived browser URLs, and
//! the artifact sink the export worker publishes through.
//!
//! The resolver contract forbids storage-native credentials in any response
//! field; a signed resolver derives a per-URL tag instead of embedding the
//! secret.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_URL_TTL_MS: i64 = 15 * 60 * 1000;
pub const MIN_URL_TTL_MS: i64 = 5 * 60 * 1000;
pub const MAX_URL_TTL_MS: i64 = 60 * 60 * 1000;

/// Clamp a requested TTL into the allowed 5–60 minute band.
pub fn clamp_ttl(ttl_ms: i64) -> i64 {
    ttl_ms.clamp(MIN_URL_TTL_MS, MAX_URL_TTL_MS)
}

/// A browser-usable URL derived from a logical URI.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedUrl {
    pub url: String,
    /// Epoch millis; None for URLs that do not expire (public storage).
    pub expires_at: Option<i64>,
}

#[async_trait]
pub trait StorageResolver: Send + Sync {
    async fn resolve(&self, logical_uri: &str, ttl_ms: i64, now_ms: i64) -> Result<ResolvedUrl>;
}

/// Sink for export artifacts. `put` returns the logical URI of the stored
/// object.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;
}

/// Identity resolver for deployments whose media is on public URLs.
pub struct PublicUrlResolver;

#[async_trait]
impl StorageResolver for PublicUrlResolver {
    async fn resolve(&self, logical_uri: &str, _ttl_ms: i64, _now_ms: i64) -> Result<ResolvedUrl> {
        Ok(ResolvedUrl {
            url: logical_uri.to_string(),
            expires_at: None,
        })
    }
}

/// Signed-URL resolver for private storage behind a media gateway.
///
/// `storage://{path}` becomes `{base_url}/{path}?exp={ms}&sig={hex}` where
/// the signature is HMAC-SHA256 over `path|exp`. The gateway holds the same
/// secret and verifies; the secret itself never appears in a URL.
pub struct SignedUrlResolver {
    base_url: String,
    secret: Vec<u8>,
}

impl SignedUrlResolver {
    pub fn new(base_url: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            base_url: base_url.into(),
            secret: secret.into(),
        }
    }

    fn sign(&self, path: &str, expires_at: i64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(path.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl StorageResolver for SignedUrlResolver {
    async fn resolve(&self, logical_uri: &str, ttl_ms: i64, now_ms: i64) -> Result<ResolvedUrl> {
        let path = logical_uri
            .strip_prefix("storage://")
            .with_context(|| format!("not a storage uri: {}", logical_uri))?;
        let expires_at = now_ms + clamp_ttl(ttl_ms);
        let sig = self.sign(path, expires_at);
        Ok(ResolvedUrl {
            url: format!(
                "{}/{}?exp={}&sig={}",
                self.base_url.trim_end_matches('/'),
                path,
                expires_at,
                sig
            ),
            expires_at: Some(expires_at),
        })
    }
}

/// Filesystem-backed artifact store; export artifacts land under `root`
/// and are addressed as `storage://{key}`.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating artifact directory {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing artifact {}", path.display()))?;
        Ok(format!("storage://{}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_clamps_to_band() {
        assert_eq!(clamp_ttl(0), MIN_URL_TTL_MS);
        assert_eq!(clamp_ttl(DEFAULT_URL_TTL_MS), DEFAULT_URL_TTL_MS);
        assert_eq!(clamp_ttl(i64::MAX), MAX_URL_TTL_MS);
    }

    #[tokio::test]
    async fn public_resolver_is_identity() {
        let resolved = PublicUrlResolver
            .resolve("https://cdn.example.com/a.png", DEFAULT_URL_TTL_MS, 0)
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://cdn.example.com/a.png");
        assert!(resolved.expires_at.is_none());
    }

    #[tokio::test]
    async fn signed_resolver_embeds_expiry_and_tag() {
        let resolver = SignedUrlResolver::new("https://media.example.com", b"secret".to_vec());
        let now = 1_000_000;
        let resolved = resolver
            .resolve("storage://media/scan.png", DEFAULT_URL_TTL_MS, now)
            .await
            .unwrap();
        let expires = now + DEFAULT_URL_TTL_MS;
        assert!(resolved.url.starts_with("https://media.example.com/media/scan.png?exp="));
        assert!(resolved.url.contains(&format!("exp={}", expires)));
        assert_eq!(resolved.expires_at, Some(expires));
        // The secret itself never shows up in the URL.
        assert!(!resolved.url.contains("secret"));
    }

    #[tokio::test]
    async fn signed_resolver_rejects_foreign_uris() {
        let resolver = SignedUrlResolver::new("https://media.example.com", b"secret".to_vec());
        assert!(resolver
            .resolve("https://other.example.com/a.png", DEFAULT_URL_TTL_MS, 0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn fs_artifact_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let uri = store.put("exports/test/dataset.jsonl", b"abc").await.unwrap();
        assert_eq!(uri, "storage://exports/test/dataset.jsonl");
        let on_disk = std::fs::read(dir.path().join("exports/test/dataset.jsonl")).unwrap();
        assert_eq!(on_disk, b"abc");
    }
}
