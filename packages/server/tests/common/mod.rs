//! Shared fixtures for scenario tests, built on the in-memory kernel
//! implementations.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use server_core::common::auth::{Caller, Role};
use server_core::common::cursor::CursorCodec;
use server_core::common::id::Clock;
use server_core::domains::decisions::ingest::EventInput;
use server_core::domains::items::models::{Item, ItemVariant, ItemWithVariants, MediaType};
use server_core::domains::projects::models::Project;
use server_core::kernel::test_dependencies::{
    ManualClock, MemoryArtifactStore, MemoryStore, StaticIdentity,
};
use server_core::kernel::{ServerKernel, Settings, Store, PublicUrlResolver};

/// A fixed "now" far from zero so skew math stays readable.
pub const NOW_MS: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct TestWorld {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub kernel: Arc<ServerKernel>,
}

pub fn world() -> TestWorld {
    world_with_identity(StaticIdentity::new())
}

pub fn world_with_identity(identity: StaticIdentity) -> TestWorld {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at(NOW_MS));
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let kernel = Arc::new(ServerKernel::new(
        store.clone() as Arc<dyn Store>,
        Arc::new(identity),
        Arc::new(PublicUrlResolver),
        artifacts.clone(),
        clock.clone() as Arc<dyn Clock>,
        CursorCodec::new(b"test-cursor-secret".to_vec()),
        Settings::default(),
    ));
    TestWorld {
        store,
        clock,
        artifacts,
        kernel,
    }
}

pub fn project(id: Uuid) -> Project {
    project_with_config(id, json!({}))
}

pub fn project_with_config(id: Uuid, config: serde_json::Value) -> Project {
    Project {
        id,
        org_id: Uuid::new_v4(),
        slug: format!("proj-{}", &id.to_string()[..8]),
        decision_schema: json!({
            "version": 1,
            "choices": [
                {"id": "keep", "label": "Keep", "hotkey": "k"},
                {"id": "drop", "label": "Drop", "hotkey": "d"},
                {"id": "flag", "label": "Flag"}
            ],
            "allow_notes": true
        }),
        config,
        created_at: chrono::Utc::now(),
        deleted_at: None,
    }
}

pub fn item(project_id: Uuid, sort_key: &str) -> ItemWithVariants {
    let id = Uuid::new_v4();
    ItemWithVariants {
        item: Item {
            id,
            project_id,
            external_id: format!("ext-{}", sort_key),
            media_type: MediaType::Image,
            logical_uri: format!("storage://media/{}.png", sort_key),
            sort_key: sort_key.to_string(),
            metadata: json!({"session_id": "s1"}),
            created_at: chrono::Utc::now(),
            deleted_at: None,
        },
        variants: vec![ItemVariant {
            item_id: id,
            variant_key: "raw".into(),
            label: "Raw".into(),
            logical_uri: format!("storage://media/{}.raw.png", sort_key),
            sort_order: 0,
            metadata: json!({}),
        }],
    }
}

pub fn event_input(item_id: Uuid, decision_id: &str, ts_client: i64) -> EventInput {
    EventInput {
        event_id: Uuid::new_v4().to_string(),
        item_id: item_id.to_string(),
        decision_id: decision_id.to_string(),
        note: None,
        ts_client,
    }
}

pub fn caller() -> Caller {
    Caller {
        id: Uuid::new_v4(),
        email: "reviewer@example.com".into(),
    }
}

/// Identity with one token-authenticated user holding `role` in `project_id`.
pub fn identity_with(token: &str, c: &Caller, project_id: Uuid, role: Role) -> StaticIdentity {
    StaticIdentity::new()
        .with_user(token, c.clone())
        .with_role(c.id, project_id, role)
}
