//! End-to-end behavior of runtime-provisioned endpoints.

use serde_json::{json, Value};
use std::time::Duration;

use dynapi::store::{ModuleDefinition, SchemaDefinition};

mod common;
use common::{spawn_app, test_config, wait_for_status, wait_until};

#[tokio::test]
async fn test_created_record_then_module_removed() {
    let app = spawn_app(test_config()).await;
    app.store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &["item"])])
        .unwrap();
    wait_for_status(&app, "/shop/orders", 200).await;

    let res = app
        .client
        .post(app.url("/shop/orders"))
        .json(&json!({"item": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
    let record: Value = res.json().await.unwrap();
    assert_eq!(record["item"], "x");
    assert!(record["_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(record["isDeleted"], false);

    app.store.upsert_project("shop", vec![]).unwrap();
    wait_for_status(&app, "/shop/orders", 404).await;

    let body: Value = app
        .client
        .get(app.url("/shop/orders"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"error": "Route not found"}));
}

#[tokio::test]
async fn test_schema_rejects_missing_field() {
    let app = spawn_app(test_config()).await;
    let shop = app
        .store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &["item"])])
        .unwrap();
    app.store
        .set_schema(
            &shop.id,
            Some(SchemaDefinition(json!({
                "type": "object",
                "required": ["item"],
                "properties": {"item": {"type": "string"}}
            }))),
        )
        .unwrap();

    // Wait until the validating table is live.
    let client = &app.client;
    let url = &app.url("/shop/orders");
    wait_until(Duration::from_secs(5), "validator installed", move || async move {
        let res = client.post(url).json(&json!({})).send().await.unwrap();
        let body: Value = res.json().await.unwrap_or_default();
        body["error"] == "Validation failed"
    })
    .await;

    let res = client.post(url).json(&json!({})).send().await.unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    let details = body["details"].as_array().unwrap();
    assert!(details
        .iter()
        .any(|d| d["message"].as_str().unwrap().contains("item")));

    let res = client.post(url).json(&json!({"item": "x"})).send().await.unwrap();
    assert_eq!(res.status(), 201);
}

#[tokio::test]
async fn test_rapid_updates_are_not_lost() {
    let app = spawn_app(test_config()).await;

    app.store
        .upsert_project("shop", vec![ModuleDefinition::new("a", &[])])
        .unwrap();
    app.store
        .upsert_project(
            "shop",
            vec![ModuleDefinition::new("a", &[]), ModuleDefinition::new("b", &[])],
        )
        .unwrap();

    wait_for_status(&app, "/shop/a", 200).await;
    wait_for_status(&app, "/shop/b", 200).await;
}

#[tokio::test]
async fn test_converges_to_final_configuration() {
    let app = spawn_app(test_config()).await;

    for i in 0..20 {
        let modules = (0..=i % 4)
            .map(|m| ModuleDefinition::new(format!("m{}", m), &[]))
            .collect();
        app.store.upsert_project("burst", modules).unwrap();
    }
    // Final state: i = 19 → modules m0..=m3.
    app.store.insert_project("other", vec![ModuleDefinition::new("x", &[])]).unwrap();
    app.store.delete_project("other").unwrap();

    let expected = ["/burst/m0", "/burst/m1", "/burst/m2", "/burst/m3"];
    let engine = &app.engine;
    wait_until(Duration::from_secs(5), "table converged", move || async move {
        let table = engine.routes.snapshot();
        let keys: Vec<&str> = table.keys().collect();
        keys.len() == expected.len() && expected.iter().all(|k| keys.contains(k))
    })
    .await;
    assert_eq!(app.get_status("/other/x").await, 404);
}

#[tokio::test]
async fn test_deleted_project_is_torn_down() {
    let app = spawn_app(test_config()).await;
    app.store
        .insert_project(
            "shop",
            vec![ModuleDefinition::new("orders", &[]), ModuleDefinition::new("items", &[])],
        )
        .unwrap();
    app.store
        .insert_project("blog", vec![ModuleDefinition::new("posts", &[])])
        .unwrap();
    wait_for_status(&app, "/shop/orders", 200).await;
    wait_for_status(&app, "/blog/posts", 200).await;

    app.client
        .post(app.url("/shop/orders"))
        .json(&json!({"item": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(app.store.record_count("shop_orders"), 1);

    app.store.delete_project("shop").unwrap();
    wait_for_status(&app, "/shop/orders", 404).await;
    wait_for_status(&app, "/shop/items", 404).await;

    let store = &app.store;
    wait_until(Duration::from_secs(5), "collection dropped", move || async move {
        !store.collection_names().contains(&"shop_orders".to_string())
    })
    .await;
    assert_eq!(app.get_status("/blog/posts").await, 200);
}

#[tokio::test]
async fn test_malformed_schema_accepts_everything() {
    let app = spawn_app(test_config()).await;
    let shop = app
        .store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
        .unwrap();
    app.store
        .set_schema(&shop.id, Some(SchemaDefinition(json!({"type": 12}))))
        .unwrap();

    let engine = &app.engine;
    wait_until(Duration::from_secs(5), "degraded schema reported", move || async move {
        engine
            .orchestrator
            .report()
            .degraded_schemas
            .contains(&"shop".to_string())
    })
    .await;

    for payload in [json!({"anything": [1, 2]}), json!({"item": 42})] {
        let res = app
            .client
            .post(app.url("/shop/orders"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
    }
}

#[tokio::test]
async fn test_record_lifecycle_and_error_mapping() {
    let app = spawn_app(test_config()).await;
    app.store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
        .unwrap();
    wait_for_status(&app, "/shop/orders", 200).await;
    let client = &app.client;

    let created: Value = client
        .post(app.url("/shop/orders"))
        .json(&json!({"item": "x", "qty": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap();
    let record_url = app.url(&format!("/shop/orders/{}", id));

    let res = client.put(&record_url).json(&json!({"qty": 3})).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["qty"], 3);
    assert_eq!(updated["item"], "x");

    let listed: Vec<Value> = client
        .get(app.url("/shop/orders"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let res = client.delete(&record_url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Deleted successfully");

    let res = client.get(&record_url).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.json::<Value>().await.unwrap()["message"], "Not found");

    let res = client.get(app.url("/shop/orders/not-an-id")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.json::<Value>().await.unwrap()["message"], "Invalid object id.");

    let res = client.post(app.url("/shop/orders")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "Request body is empty!");

    let res = client.put(app.url("/shop/orders/not-an-id")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.json::<Value>().await.unwrap()["message"], "Invalid object id.");

    let res = client
        .post(app.url("/shop/orders"))
        .json(&json!({"_id": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.json::<Value>().await.unwrap()["error"], "Request body is empty!");

    let res = client
        .post(app.url("/shop/orders"))
        .header("content-type", "application/json")
        .body("[1, 2]")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let res = client.patch(app.url("/shop/orders")).send().await.unwrap();
    assert_eq!(res.status(), 405);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = spawn_app(test_config()).await;

    let res = app.client.get(app.url("/nothing/here")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert!(res.headers().contains_key("x-request-id"));

    let res = app
        .client
        .get(app.url("/nothing/here"))
        .header("x-request-id", "trace-me")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_store_outage_keeps_routes_mounted() {
    let app = spawn_app(test_config()).await;
    app.store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
        .unwrap();
    wait_for_status(&app, "/shop/orders", 200).await;

    app.store.set_available(false);
    assert!(app.engine.orchestrator.reload_now().await.is_err());

    let res = app.client.get(app.url("/shop/orders")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    assert_eq!(
        res.json::<Value>().await.unwrap(),
        json!({"error": "Internal server error"})
    );
    assert!(app.engine.routes.snapshot().contains("/shop/orders"));

    app.store.set_available(true);
    wait_for_status(&app, "/shop/orders", 200).await;
}

#[tokio::test]
async fn test_projects_file_changes_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("projects.toml");
    std::fs::write(
        &path,
        "[[projects]]\nname = \"shop\"\nmodules = [{ name = \"orders\" }]\n",
    )
    .unwrap();

    let mut config = test_config();
    config.store.projects_file = Some(path.display().to_string());
    let app = spawn_app(config).await;
    assert_eq!(app.get_status("/shop/orders").await, 200);

    std::fs::write(
        &path,
        "[[projects]]\nname = \"blog\"\nmodules = [{ name = \"posts\" }]\n",
    )
    .unwrap();

    let app = &app;
    wait_until(Duration::from_secs(10), "projects file applied", move || async move {
        app.get_status("/blog/posts").await == 200 && app.get_status("/shop/orders").await == 404
    })
    .await;
}

#[tokio::test]
async fn test_oversized_body_rejected_within_layer_stack() {
    let mut config = test_config();
    config.security.max_body_size = 64;
    let app = spawn_app(config).await;
    app.store
        .insert_project("shop", vec![ModuleDefinition::new("orders", &[])])
        .unwrap();
    wait_for_status(&app, "/shop/orders", 200).await;

    let res = app
        .client
        .post(app.url("/shop/orders"))
        .json(&json!({"item": "x".repeat(256)}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert!(res.headers().contains_key("x-request-id"));

    let res = app
        .client
        .post(app.url("/shop/orders"))
        .json(&json!({"item": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 201);
}
