//! Authentication fallback chain, paginated ROM fetch, and single-ROM fetch
//! against a hand-rolled HTTP stub standing in for the catalog server.

mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use romm_sync::CatalogClient;
use support::{spawn_stub, StubResponse};

const ROM_FIELDS: &str = "id,name,fs_name,platform_name,platform_slug,files,multi";

#[tokio::test]
async fn authenticate_falls_back_from_cookie_and_basic_to_oauth_password_grant() {
    let mut routes = HashMap::new();
    // Both the cookie probe and the HTTP-Basic probe hit this same path;
    // the stub rejects both so the client falls through to OAuth.
    routes.insert("GET /api/roms?limit=1", StubResponse::json(401, "{}"));
    routes.insert(
        "POST /api/token",
        StubResponse::json(
            200,
            r#"{"access_token":"tok-1","refresh_token":"ref-1","token_type":"bearer","expires_in":3600}"#,
        ),
    );

    let stub = spawn_stub(routes).await;
    let client = CatalogClient::new(stub.base_url.clone()).unwrap();
    client.authenticate("alice", "hunter2").await.unwrap();
}

#[tokio::test]
async fn fetch_all_roms_pages_through_the_stub() {
    let mut routes = HashMap::new();
    routes.insert("GET /api/roms?limit=1", StubResponse::json(401, "{}"));
    routes.insert(
        "POST /api/token",
        StubResponse::json(
            200,
            r#"{"access_token":"tok-1","refresh_token":"ref-1","token_type":"bearer","expires_in":3600}"#,
        ),
    );
    routes.insert(
        "GET /api/roms?limit=1&fields=id",
        StubResponse::json(200, r#"{"items":[],"total":2}"#),
    );
    routes.insert(
        &*Box::leak(format!("GET /api/roms?limit=500&offset=0&fields={ROM_FIELDS}").into_boxed_str()),
        StubResponse::json(
            200,
            r#"{"items":[
                {"id":1,"name":"Super Mario World","fs_name":"Super Mario World (USA).sfc","platform_name":"SNES","platform_slug":"snes","multi":false,"fs_size_bytes":524288},
                {"id":2,"name":"Chrono Trigger","fs_name":"Chrono Trigger (USA).sfc","platform_name":"SNES","platform_slug":"snes","multi":false,"fs_size_bytes":4194304}
            ],"total":2}"#,
        ),
    );

    let stub = spawn_stub(routes).await;
    let client = CatalogClient::new(stub.base_url.clone()).unwrap();
    client.authenticate("alice", "hunter2").await.unwrap();

    let pages_seen = Arc::new(Mutex::new(Vec::new()));
    let pages_seen_cb = pages_seen.clone();
    let roms = client
        .fetch_all_roms(move |progress| {
            pages_seen_cb.lock().unwrap().push(progress.pages_done);
        })
        .await
        .unwrap();

    assert_eq!(roms.len(), 2);
    assert_eq!(roms[0].name, "Super Mario World");
    assert_eq!(roms[1].platform_slug, "snes");
    assert!(!pages_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn get_rom_surfaces_user_saves_and_states() {
    let mut routes = HashMap::new();
    routes.insert("GET /api/roms?limit=1", StubResponse::json(401, "{}"));
    routes.insert(
        "POST /api/token",
        StubResponse::json(
            200,
            r#"{"access_token":"tok-1","refresh_token":"ref-1","token_type":"bearer","expires_in":3600}"#,
        ),
    );
    routes.insert(
        "GET /api/roms/42",
        StubResponse::json(
            200,
            r#"{
                "id":42,"name":"Super Mario World","fs_name":"Super Mario World (USA).sfc",
                "platform_name":"SNES","platform_slug":"snes","multi":false,"fs_size_bytes":524288,
                "user_saves":[{
                    "id":7,"rom_id":42,"file_name":"SMW [2024-01-01 12-00-00-000].srm",
                    "emulator":"snes9x","slot":"","updated_at":"2024-01-01T12:00:00Z",
                    "created_at":null,"file_size_bytes":5,"download_path":null,
                    "screenshot":null,"device_syncs":[]
                }],
                "user_states":[]
            }"#,
        ),
    );

    let stub = spawn_stub(routes).await;
    let client = CatalogClient::new(stub.base_url.clone()).unwrap();
    client.authenticate("alice", "hunter2").await.unwrap();

    let detail = client.get_rom(42).await.unwrap();
    assert_eq!(detail.entry.name, "Super Mario World");
    assert_eq!(detail.user_saves.len(), 1);
    assert_eq!(detail.user_saves[0].file_name, "SMW [2024-01-01 12-00-00-000].srm");
    assert!(detail.user_states.is_empty());
}
