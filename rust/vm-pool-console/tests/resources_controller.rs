//! End-to-end tests for the resources controller, driven through the full
//! router with an in-memory database and trusted remote-user auth.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use vm_pool_console::config::AppConfig;
use vm_pool_console::database::{
    PermissionRepository, PoolRepository, SqliteBackend, VmRepository,
};
use vm_pool_console::domain::{NewVm, Pool, PoolAttributes, PoolKind, Role, Vm, VmState};
use vm_pool_console::server::create_app;

const ADMIN: &str = "admin";
const DEFAULT_HW: i64 = 2;

struct Console {
    app: Router,
    db: SqliteBackend,
}

impl Console {
    async fn new() -> Self {
        let db = SqliteBackend::in_memory().unwrap();
        db.bootstrap(Some(ADMIN.to_string())).await.unwrap();

        let mut config = AppConfig::default();
        config.gateway.trust_remote_user = true;
        let app = create_app(config, Some(db.clone())).await.unwrap();
        Self { app, db }
    }

    async fn pool(&self, name: &str) -> Pool {
        self.db
            .create_pool(
                PoolKind::VmResource,
                DEFAULT_HW,
                PoolAttributes {
                    name: Some(name.to_string()),
                    description: None,
                },
            )
            .await
            .unwrap()
    }

    async fn vm(&self, pool: &Pool, description: &str, state: VmState) -> Vm {
        self.db
            .create_vm(NewVm::new(description, pool.id).with_state(state))
            .await
            .unwrap()
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, user: &str) -> axum::response::Response {
        self.send(
            Request::get(uri)
                .header("x-remote-user", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post(&self, uri: &str, user: &str, body: Value) -> axum::response::Response {
        self.send(
            Request::post(uri)
                .header("x-remote-user", user)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

/// `name=value` of the flash cookie set by `response`.
fn flash_cookie(response: &axum::response::Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("flash="))
        .and_then(|v| v.split(';').next())
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let console = Console::new().await;
    let response = console
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = console
        .send(Request::get("/ready").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["database"], true);
}

#[tokio::test]
async fn test_anonymous_request_is_rejected() {
    let console = Console::new().await;
    let response = console
        .send(Request::get("/resources/list").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "missing_auth");
}

#[tokio::test]
async fn test_list_shows_only_visible_pools() {
    let console = Console::new().await;
    let web = console.pool("web").await;
    let db = console.pool("db").await;
    let web01 = console.vm(&web, "web01", VmState::Running).await;
    console.vm(&db, "db01", VmState::Running).await;
    console.db.grant("alice", Role::Monitor, web.id).await.unwrap();

    let response = console.get("/resources/list", "alice").await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["layout"], "default");
    assert_eq!(view["user"], "alice");
    assert_eq!(view["vm_resource_pools"].as_array().unwrap().len(), 1);
    assert_eq!(view["vm_resource_pools"][0]["name"], "web");
    assert_eq!(view["vms"], json!([{
        "id": web01.id,
        "description": "web01",
        "uuid": web01.uuid,
        "num_vcpus_allocated": 1,
        "memory_allocated_in_mb": 512,
        "vnic_mac_addr": "",
        "state": "running",
    }]));
    assert_eq!(view["action_values"].as_array().unwrap().len(), 4);

    let admin_view = json_body(console.get("/resources", ADMIN).await).await;
    assert_eq!(admin_view["vm_resource_pools"].as_array().unwrap().len(), 2);
    assert_eq!(admin_view["vms"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_show_denied_redirects_to_list_with_notice() {
    let console = Console::new().await;
    let web = console.pool("web").await;

    for uri in [
        format!("/resources/show/{}", web.id),
        format!("/resources/vms_json/{}", web.id),
        "/resources/show/9999".to_string(),
        "/resources/show/abc".to_string(),
        format!("/resources/show/{DEFAULT_HW}"),
    ] {
        let response = console.get(&uri, "mallory").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(&response), "/resources/list");
    }

    let response = console.get(&format!("/resources/show/{}", web.id), "mallory").await;
    let cookie = flash_cookie(&response);
    let list = console
        .send(
            Request::get("/resources/list")
                .header("x-remote-user", "mallory")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let view = json_body(list).await;
    assert_eq!(
        view["flash"]["notice"],
        "You do not have permission to view this VM Resource Pool: redirecting to top level"
    );
}

#[tokio::test]
async fn test_show_tabs_carry_permissions() {
    let console = Console::new().await;
    let web = console.pool("web").await;
    console.db.grant("bob", Role::User, web.id).await.unwrap();

    let view = json_body(console.get(&format!("/resources/show/{}?ajax=1", web.id), "bob").await).await;
    assert_eq!(view["layout"], "tabs-and-content");
    assert_eq!(view["template"], "show");
    assert_eq!(view["current_pool_id"], web.id);
    assert_eq!(view["parent"]["id"], DEFAULT_HW);
    assert_eq!(view["can_view"], true);
    assert_eq!(view["can_control_vms"], true);
    assert_eq!(view["can_modify"], false);
    assert_eq!(view["is_hwpool_admin"], false);

    let admin = json_body(console.get(&format!("/resources/show/{}", web.id), ADMIN).await).await;
    assert_eq!(admin["layout"], "default");
    assert_eq!(admin["can_set_perms"], true);
    assert_eq!(admin["is_hwpool_admin"], true);

    let summary = json_body(console.get(&format!("/resources/quick_summary/{}", web.id), "bob").await).await;
    assert_eq!(summary["layout"], "selection");

    let vms = json_body(console.get(&format!("/resources/show_vms/{}", web.id), "bob").await).await;
    assert_eq!(vms["actions"].as_array().unwrap().len(), 6);
    assert_eq!(vms["actions"][1]["separator_after"], true);

    let users = json_body(console.get(&format!("/resources/show_users/{}", web.id), "bob").await).await;
    assert_eq!(users["roles"], json!(["Super Admin", "Administrator", "User", "Monitor"]));
}

#[tokio::test]
async fn test_users_json_lists_direct_grants() {
    let console = Console::new().await;
    let web = console.pool("web").await;
    console.db.grant("carol", Role::Administrator, web.id).await.unwrap();
    console.db.grant("bob", Role::Monitor, web.id).await.unwrap();

    let response = console.get(&format!("/resources/users_json/{}", web.id), ADMIN).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rows = json_body(response).await;
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["uid"], "bob");
    assert_eq!(rows[1]["user_role"], "Administrator");
}

#[tokio::test]
async fn test_create_acknowledges_outcome() {
    let console = Console::new().await;

    let ack = json_body(
        console
            .post(
                "/resources/create",
                ADMIN,
                json!({"parent_id": DEFAULT_HW, "vm_resource_pool": {"name": "web"}}),
            )
            .await,
    )
    .await;
    assert_eq!(
        ack,
        json!({
            "object": "vm_resource_pool",
            "success": true,
            "alert": "Virtual Machine Pool was successfully created.",
        })
    );

    let duplicate = json_body(
        console
            .post(
                "/resources/create",
                ADMIN,
                json!({"parent_id": DEFAULT_HW.to_string(), "vm_resource_pool": {"name": " web "}}),
            )
            .await,
    )
    .await;
    assert_eq!(duplicate["success"], false);
    assert_eq!(duplicate["errors"], json!(["Name has already been taken"]));

    let denied = console
        .post(
            "/resources/create",
            "mallory",
            json!({"parent_id": DEFAULT_HW, "vm_resource_pool": {"name": "sneaky"}}),
        )
        .await;
    assert_eq!(denied.status(), StatusCode::OK);
    let denied = json_body(denied).await;
    assert_eq!(denied["success"], false);
    assert!(denied["alert"].is_string());

    let pools = console
        .db
        .list_pools_for_user(ADMIN, vm_pool_console::domain::Privilege::View)
        .await
        .unwrap();
    assert_eq!(pools.len(), 1);
}

#[tokio::test]
async fn test_non_post_on_mutation_redirects_to_list() {
    let console = Console::new().await;
    let web = console.pool("web").await;

    let response = console.get("/resources/create", ADMIN).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/resources/list");

    for (method, uri) in [
        (Method::PUT, "/resources/create".to_string()),
        (Method::PATCH, format!("/resources/update/{}", web.id)),
        (Method::DELETE, format!("/resources/destroy/{}", web.id)),
    ] {
        let response = console
            .send(
                Request::builder()
                    .method(method.clone())
                    .uri(&uri)
                    .header("x-remote-user", ADMIN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{method} {uri}");
        assert_eq!(location(&response), "/resources/list");
    }
    assert!(console.db.find_pool(web.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_new_and_edit_forms() {
    let console = Console::new().await;
    let web = console.pool("web").await;
    console.db.grant("bob", Role::User, web.id).await.unwrap();

    let form = json_body(console.get(&format!("/resources/new?parent_id={DEFAULT_HW}"), ADMIN).await).await;
    assert_eq!(form["layout"], "popup");
    assert_eq!(form["template"], "new");
    assert_eq!(form["parent"]["id"], DEFAULT_HW);

    let denied = console.get(&format!("/resources/new?parent_id={DEFAULT_HW}"), "bob").await;
    assert_eq!(denied.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&denied), format!("/hardware/show/{DEFAULT_HW}"));

    let edit = json_body(console.get(&format!("/resources/edit/{}", web.id), ADMIN).await).await;
    assert_eq!(edit["template"], "edit");
    assert_eq!(edit["attributes"]["name"], "web");

    let denied = console.get(&format!("/resources/edit/{}", web.id), "bob").await;
    assert_eq!(denied.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&denied), web.show_path());
}

#[tokio::test]
async fn test_update_redirects_or_rerenders() {
    let console = Console::new().await;
    let web = console.pool("web").await;

    let response = console
        .post(
            &format!("/resources/update/{}", web.id),
            ADMIN,
            json!({"vm_resource_pool": {"name": "frontend", "description": "public tier"}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), web.show_path());
    assert!(flash_cookie(&response).starts_with("flash="));

    let updated = console.db.find_pool(web.id).await.unwrap().unwrap();
    assert_eq!(updated.name, "frontend");
    assert_eq!(updated.description.as_deref(), Some("public tier"));

    let response = console
        .post(
            &format!("/resources/update/{}", web.id),
            ADMIN,
            json!({"vm_resource_pool": {"name": "   "}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let form = json_body(response).await;
    assert_eq!(form["errors"], json!(["Name can't be blank"]));
    assert_eq!(console.db.find_pool(web.id).await.unwrap().unwrap().name, "frontend");
}

#[tokio::test]
async fn test_bulk_delete_is_all_or_nothing() {
    let console = Console::new().await;
    let a = console.pool("a").await;
    let b = console.pool("b").await;
    let busy = console.pool("busy").await;
    console.vm(&busy, "vm", VmState::Stopped).await;

    let ack = json_body(
        console
            .post(
                "/resources/delete",
                ADMIN,
                json!({"vm_pool_ids": format!("{},{}", a.id, busy.id)}),
            )
            .await,
    )
    .await;
    assert_eq!(ack["success"], false);
    assert_eq!(ack["alert"], "Error in deleting Virtual Machine Pools.");
    assert!(console.db.find_pool(a.id).await.unwrap().is_some());

    let ack = json_body(
        console
            .post(
                "/resources/delete",
                ADMIN,
                json!({"vm_pool_ids": format!("{}, {}", a.id, b.id)}),
            )
            .await,
    )
    .await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["alert"], "Virtual Machine Pools a, b were successfully deleted.");
    assert!(console.db.find_pool(b.id).await.unwrap().is_none());

    let ack = json_body(console.post("/resources/delete", ADMIN, json!({"vm_pool_ids": "x"})).await).await;
    assert_eq!(ack["success"], false);
}

#[tokio::test]
async fn test_bulk_delete_names_repeated_pool_once() {
    let console = Console::new().await;
    let a = console.pool("a").await;

    let ack = json_body(
        console
            .post(
                "/resources/delete",
                ADMIN,
                json!({"vm_pool_ids": format!("{0},{0},9999", a.id)}),
            )
            .await,
    )
    .await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["alert"], "Virtual Machine Pools a were successfully deleted.");
    assert!(console.db.find_pool(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_destroy() {
    let console = Console::new().await;
    let busy = console.pool("busy").await;
    console.vm(&busy, "vm", VmState::Stopped).await;
    let idle = console.pool("idle").await;

    let response = console.post(&format!("/resources/destroy/{}", busy.id), ADMIN, json!({})).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), busy.show_path());
    assert!(console.db.find_pool(busy.id).await.unwrap().is_some());

    let response = console.post(&format!("/resources/destroy/{}", idle.id), ADMIN, json!({})).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), format!("/hardware/show/{DEFAULT_HW}"));
    assert!(console.db.find_pool(idle.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_vm_actions_confirmation() {
    let console = Console::new().await;
    let web = console.pool("web").await;
    let running = console.vm(&web, "web01", VmState::Running).await;
    let stopped = console.vm(&web, "web02", VmState::Stopped).await;
    console.db.grant("bob", Role::User, web.id).await.unwrap();
    console.db.grant("eve", Role::Monitor, web.id).await.unwrap();

    let uri = format!("/resources/vm_actions/{}", web.id);
    let view = json_body(
        console
            .post(
                &uri,
                "bob",
                json!({"vm_action": "suspend_vm", "vm_ids": format!("{},{}", running.id, stopped.id)}),
            )
            .await,
    )
    .await;
    assert_eq!(view["layout"], "confirmation");
    assert_eq!(view["action"], "suspend_vm");
    assert_eq!(view["action_label"], "Suspend");
    assert_eq!(view["success_list"][0]["id"], running.id);
    assert_eq!(view["failure_list"][0]["id"], stopped.id);
    assert!(view.get("flash").is_none());
    assert_eq!(console.db.tasks_for_vm(running.id).await.unwrap().len(), 1);

    let view = json_body(
        console
            .post(&uri, "bob", json!({"vm_action": "explode_vm", "vm_ids": running.id.to_string()}))
            .await,
    )
    .await;
    assert_eq!(view["flash"]["errmsg"], "Error queueing VM actions.");
    assert_eq!(view["success_list"], json!([]));
    assert_eq!(view["action_label"], Value::Null);

    let view = json_body(
        console
            .post(&uri, "bob", json!({"vm_action": "resume_vm", "vm_ids": format!("{},9999", running.id)}))
            .await,
    )
    .await;
    assert_eq!(view["flash"]["errmsg"], "Error queueing VM actions.");
    assert_eq!(console.db.tasks_for_vm(running.id).await.unwrap().len(), 1);

    let denied = console
        .post(&uri, "eve", json!({"vm_action": "suspend_vm", "vm_ids": running.id.to_string()}))
        .await;
    assert_eq!(denied.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&denied), web.show_path());
}
