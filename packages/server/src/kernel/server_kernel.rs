// ServerKernel - core infrastructure with all dependencies
//
// The ServerKernel holds the store, identity adapter, storage resolver,
// artifact sink, and clock behind traits so handlers, the worker, and
// tests all share one wiring point.

use std::sync::Arc;

use crate::common::cursor::CursorCodec;
use crate::common::id::Clock;

use super::storage::{ArtifactStore, StorageResolver, DEFAULT_URL_TTL_MS};
use super::traits::{IdentityProvider, Store};

/// Request-time settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Skew window for client timestamps, ± milliseconds.
    pub skew_window_ms: i64,
    /// Default TTL for signed media URLs.
    pub url_ttl_ms: i64,
    /// Server-global export field allowlist; projects may narrow it.
    pub export_allowlist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            skew_window_ms: 24 * 60 * 60 * 1000,
            url_ttl_ms: DEFAULT_URL_TTL_MS,
            export_allowlist: default_export_allowlist(),
        }
    }
}

fn default_export_allowlist() -> Vec<String> {
    crate::domains::exports::serialize::ROOT_FIELDS
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once("metadata.*".to_string()))
        .collect()
}

/// ServerKernel holds all server dependencies
pub struct ServerKernel {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub resolver: Arc<dyn StorageResolver>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub clock: Arc<dyn Clock>,
    pub cursor: CursorCodec,
    pub settings: Settings,
}

impl ServerKernel {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        resolver: Arc<dyn StorageResolver>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        cursor: CursorCodec,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            identity,
            resolver,
            artifacts,
            clock,
            cursor,
            settings,
        }
    }
}
