//! HTTP surface tests: authentication, authorization disposition, cursor
//! paging, and the error envelope, driven through the real router.

mod common;

use common::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use server_core::common::auth::{Caller, Role};
use server_core::common::id::Clock;
use server_core::domains::exports::worker::ExportWorker;
use server_core::kernel::Store;
use server_core::server::build_app;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized_with_error_envelope() {
    let w = world();
    let app = build_app(w.kernel.clone());

    let response = app.oneshot(get("/api/v1/projects", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("unauthorized"));
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn non_membership_reads_as_not_found() {
    let c = caller();
    let member_project = Uuid::new_v4();
    let other_project = Uuid::new_v4();
    let identity = identity_with("tok", &c, member_project, Role::Reviewer);
    let w = world_with_identity(identity);
    w.store.add_project(project(member_project));
    w.store.add_project(project(other_project));
    let app = build_app(w.kernel.clone());

    // A project that exists but the caller is no member of: 404, not 403.
    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/projects/{}/items", other_project),
            Some("tok"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get(
            &format!("/api/v1/projects/{}/items", member_project),
            Some("tok"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn viewers_cannot_write_events() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Viewer));
    let p = project(project_id);
    let it = item(project_id, "0001");
    let item_id = it.item.id;
    w.store.add_project(p);
    w.store.add_item(it);
    let app = build_app(w.kernel.clone());

    let body = json!({
        "client_id": "c1",
        "session_id": "s1",
        "events": [{
            "event_id": Uuid::new_v4(),
            "item_id": item_id,
            "decision_id": "keep",
            "ts_client": NOW_MS
        }]
    });
    let response = app
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/events", project_id),
            "tok",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("forbidden"));
}

#[tokio::test]
async fn event_batch_roundtrip_and_decision_listing() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Reviewer));
    let p = project(project_id);
    let it = item(project_id, "0001");
    let item_id = it.item.id;
    w.store.add_project(p);
    w.store.add_item(it);
    let app = build_app(w.kernel.clone());

    let event_id = Uuid::new_v4();
    let body = json!({
        "client_id": "c1",
        "events": [{
            "event_id": event_id,
            "item_id": item_id,
            "decision_id": "keep",
            "note": "left edge blurry",
            "ts_client": NOW_MS
        }]
    });
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/events", project_id),
            "tok",
            &body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ingest = body_json(response).await;
    assert_eq!(ingest["acked"], json!(1));
    assert_eq!(ingest["accepted"], json!(1));
    assert_eq!(ingest["server_ts"], json!(NOW_MS));
    assert_eq!(ingest["client_id"], json!("c1"));
    assert_eq!(ingest["results"][0]["status"], json!("accepted"));

    let response = app
        .oneshot(get(
            &format!("/api/v1/projects/{}/decisions", project_id),
            Some("tok"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let decisions = body_json(response).await;
    assert_eq!(decisions["decisions"].as_array().unwrap().len(), 1);
    assert_eq!(decisions["decisions"][0]["decision_id"], json!("keep"));
    assert_eq!(decisions["decisions"][0]["note"], json!("left edge blurry"));
}

#[tokio::test]
async fn item_pages_visit_every_row_exactly_once() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Viewer));
    w.store.add_project(project(project_id));
    for sort_key in ["0001", "0002", "0003", "0004", "0005"] {
        w.store.add_item(item(project_id, sort_key));
    }
    let app = build_app(w.kernel.clone());

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let uri = match &cursor {
            Some(cursor) => format!(
                "/api/v1/projects/{}/items?limit=2&cursor={}",
                project_id, cursor
            ),
            None => format!("/api/v1/projects/{}/items?limit=2", project_id),
        };
        let response = app.clone().oneshot(get(&uri, Some("tok"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        for item in page["items"].as_array().unwrap() {
            seen.push(item["external_id"].as_str().unwrap().to_string());
        }
        match page["next_cursor"].as_str() {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }
    assert_eq!(
        seen,
        vec!["ext-0001", "ext-0002", "ext-0003", "ext-0004", "ext-0005"]
    );
}

#[tokio::test]
async fn stale_cursor_is_rejected_as_invalid() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Viewer));
    w.store.add_project(project(project_id));
    for sort_key in ["0001", "0002", "0003"] {
        w.store.add_item(item(project_id, sort_key));
    }
    let app = build_app(w.kernel.clone());

    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/projects/{}/items?limit=1", project_id),
            Some("tok"),
        ))
        .await
        .unwrap();
    let page = body_json(response).await;
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    // Eight days later the same cursor is dead.
    w.clock.advance(8 * DAY_MS);
    let response = app
        .oneshot(get(
            &format!(
                "/api/v1/projects/{}/items?limit=1&cursor={}",
                project_id, cursor
            ),
            Some("tok"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("invalid_cursor"));
}

#[tokio::test]
async fn config_reports_client_capabilities() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Viewer));
    w.store.add_project(project_with_config(
        project_id,
        json!({"variants_enabled": true, "variant_navigation_mode": "both"}),
    ));
    let app = build_app(w.kernel.clone());

    let response = app
        .oneshot(get(
            &format!("/api/v1/projects/{}/config", project_id),
            Some("tok"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let config = body_json(response).await;
    assert_eq!(config["variants_enabled"], json!(true));
    assert_eq!(config["variant_navigation_mode"], json!("both"));
    assert_eq!(config["max_compare_variants"], json!(2));
    assert_eq!(config["decision_schema"]["version"], json!(1));
    assert_eq!(
        config["media_types_supported"],
        json!(["image", "video", "pdf", "other"])
    );
}

#[tokio::test]
async fn export_lifecycle_over_http_ends_in_gone() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Reviewer));
    w.store.add_project(project(project_id));
    w.store.add_item(item(project_id, "0001"));
    let app = build_app(w.kernel.clone());

    // Create.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/exports", project_id),
            "tok",
            &json!({"mode": "labels_only", "include_fields": ["item_id", "decision_id"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    assert_eq!(created["status"], json!("queued"));
    let export_id = created["export_id"].as_str().unwrap().to_string();

    // Drive the worker through one claim.
    let claimed = w
        .kernel
        .store
        .claim_next_export_job(w.clock.now_ms())
        .await
        .unwrap()
        .unwrap();
    ExportWorker::new(
        w.kernel.store.clone(),
        w.kernel.artifacts.clone(),
        w.kernel.clock.clone(),
    )
    .run_job(claimed)
    .await;

    // Ready: manifest and a download URL.
    let uri = format!("/api/v1/projects/{}/exports/{}", project_id, export_id);
    let response = app.clone().oneshot(get(&uri, Some("tok"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await;
    assert_eq!(detail["status"], json!("ready"));
    assert!(detail["manifest"]["sha256"].is_string());
    assert!(detail["download_url"].is_string());

    // Past the artifact TTL the job is gone.
    w.clock.advance(7 * DAY_MS + 1);
    let response = app.oneshot(get(&uri, Some("tok"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("export_expired"));
}

#[tokio::test]
async fn export_jobs_of_other_users_are_hidden_without_policy() {
    let admin = caller();
    let reviewer = Caller {
        id: Uuid::new_v4(),
        email: "second@example.com".into(),
    };
    let project_id = Uuid::new_v4();
    let identity = server_core::kernel::test_dependencies::StaticIdentity::new()
        .with_user("admin-tok", admin.clone())
        .with_user("reviewer-tok", reviewer.clone())
        .with_role(admin.id, project_id, Role::Admin)
        .with_role(reviewer.id, project_id, Role::Reviewer);
    let w = world_with_identity(identity);
    w.store.add_project(project(project_id));
    let app = build_app(w.kernel.clone());

    // Admin creates a job.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/exports", project_id),
            "admin-tok",
            &json!({"include_fields": ["item_id"]}),
        ))
        .await
        .unwrap();
    let export_id = body_json(response).await["export_id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/v1/projects/{}/exports/{}", project_id, export_id);

    // Without shared visibility the reviewer cannot see it.
    let response = app
        .clone()
        .oneshot(get(&uri, Some("reviewer-tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/projects/{}/exports", project_id),
            Some("reviewer-tok"),
        ))
        .await
        .unwrap();
    let listing = body_json(response).await;
    assert!(listing["exports"].as_array().unwrap().is_empty());

    // The admin sees everything.
    let response = app.oneshot(get(&uri, Some("admin-tok"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cancel_is_idempotent_and_conflicts_when_ready() {
    let c = caller();
    let project_id = Uuid::new_v4();
    let w = world_with_identity(identity_with("tok", &c, project_id, Role::Admin));
    w.store.add_project(project(project_id));
    let app = build_app(w.kernel.clone());

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/exports", project_id),
            "tok",
            &json!({"include_fields": ["item_id"]}),
        ))
        .await
        .unwrap();
    let export_id = body_json(response).await["export_id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/v1/projects/{}/exports/{}", project_id, export_id);

    let delete = |app: axum::Router, uri: String| async move {
        app.oneshot(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header("authorization", "Bearer tok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    };

    // Queued: cancel succeeds; a second cancel is still success.
    let response = delete(app.clone(), uri.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = delete(app.clone(), uri.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);

    // A ready job conflicts.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/projects/{}/exports", project_id),
            "tok",
            &json!({"include_fields": ["item_id"]}),
        ))
        .await
        .unwrap();
    let ready_id = body_json(response).await["export_id"]
        .as_str()
        .unwrap()
        .to_string();
    let claimed = w
        .kernel
        .store
        .claim_next_export_job(w.clock.now_ms())
        .await
        .unwrap()
        .unwrap();
    ExportWorker::new(
        w.kernel.store.clone(),
        w.kernel.artifacts.clone(),
        w.kernel.clock.clone(),
    )
    .run_job(claimed)
    .await;

    let response = delete(
        app.clone(),
        format!("/api/v1/projects/{}/exports/{}", project_id, ready_id),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
