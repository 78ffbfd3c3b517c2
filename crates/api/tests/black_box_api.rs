use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use stockflow_api::config::AppConfig;

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            seed_organizations: vec!["acme".to_string(), "globex".to_string()],
            ..AppConfig::default()
        };
        let app = stockflow_api::app::build_app(&config).await.unwrap();
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn get(&self, org: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("X-Organization", org)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn post(&self, org: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .post(format!("{}/inventory", self.base_url))
            .header("X-Organization", org)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn put(&self, org: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .put(format!("{}/inventory", self.base_url))
            .header("X-Organization", org)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap())
    }

    async fn create(&self, org: &str, body: Value) -> Value {
        let (status, body) = self.post(org, body).await;
        assert_eq!(status, StatusCode::CREATED, "unexpected response: {body}");
        body["data"].clone()
    }

    /// Read models are eventually consistent; poll until `ready` holds.
    async fn get_eventually(&self, org: &str, path: &str, ready: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..100 {
            let (status, body) = self.get(org, path).await;
            if status == StatusCode::OK && ready(&body["data"]) {
                return body["data"].clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("{path} did not reach the expected state within timeout");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn decimal(v: &Value) -> Decimal {
    match v {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

fn len(v: &Value) -> usize {
    v.as_array().map(Vec::len).unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread")]
async fn health_needs_no_organization() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn organization_header_is_required_and_resolved() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .get(format!("{}/inventory/items", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let (status, body) = srv.get("nobody", "/inventory/items").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));

    let (status, body) = srv.get("acme", "/inventory/items").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metadata"]["count"], json!(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn received_order_posts_its_lines_into_stock() {
    let srv = TestServer::spawn().await;

    let a = srv.create("acme", json!({"action": "product", "sku": "A-1", "name": "Alpha"})).await;
    let b = srv.create("acme", json!({"action": "product", "sku": "B-1", "name": "Beta"})).await;
    let supplier = srv.create("acme", json!({"action": "supplier", "name": "Parts Co"})).await;

    let order = srv
        .create(
            "acme",
            json!({
                "action": "purchase-order",
                "supplier_id": supplier["id"],
                "po_number": "PO-0001",
                "items": [
                    {"product_id": a["id"], "quantity": 5, "unit_cost": "2.00"},
                    {"product_id": b["id"], "quantity": 3, "unit_cost": "10.00"}
                ]
            }),
        )
        .await;
    assert_eq!(order["status"], json!("draft"));
    assert_eq!(decimal(&order["total_amount"]), Decimal::from(40));

    for status in ["approved", "ordered"] {
        let (code, _) = srv
            .put("acme", json!({"action": "update-po-status", "id": order["id"], "status": status}))
            .await;
        assert_eq!(code, StatusCode::OK);
    }

    let (code, body) = srv
        .put("acme", json!({"action": "update-po-status", "id": order["id"], "status": "received"}))
        .await;
    assert_eq!(code, StatusCode::OK, "unexpected response: {body}");
    assert_eq!(body["data"]["receipt"]["posted_lines"], json!([1, 2]));

    let items = srv.get_eventually("acme", "/inventory/items", |d| len(d) == 2).await;
    let alpha = items
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["product_id"] == a["id"])
        .unwrap();
    assert_eq!(alpha["quantity"], json!(5));
    assert_eq!(decimal(&alpha["average_cost"]), Decimal::from(2));
    assert_eq!(alpha["product_name"], json!("Alpha"));

    let path = format!("/inventory/movements?reference={}", order["id"].as_str().unwrap());
    let movements = srv.get_eventually("acme", &path, |d| len(d) == 2).await;
    assert!(movements.as_array().unwrap().iter().all(|m| m["movement_type"] == json!("stock_in")));

    // Received is final.
    let (code, body) = srv
        .put("acme", json!({"action": "update-po-status", "id": order["id"], "status": "draft"}))
        .await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn stock_errors_map_to_client_statuses() {
    let srv = TestServer::spawn().await;
    let product = srv.create("acme", json!({"action": "product", "sku": "W-1", "name": "Widget"})).await;
    let location = srv.create("acme", json!({"action": "location", "name": "Shelf"})).await;

    let movement = |movement_type: &str, quantity: i64| {
        json!({
            "action": "movement",
            "product_id": product["id"],
            "location_id": location["id"],
            "movement_type": movement_type,
            "quantity": quantity,
            "unit_cost": "1.50"
        })
    };

    let recorded = srv.create("acme", movement("stock_in", 4)).await;
    assert_eq!(recorded["stock_item"]["quantity"], json!(4));

    let (code, body) = srv.post("acme", movement("stock_out", 10)).await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("insufficient"));

    let (code, _) = srv.post("acme", movement("stock_in", 0)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = srv.post("acme", json!({"action": "movement", "quantity": "lots"})).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = srv
        .put(
            "acme",
            json!({"action": "update-stock-item", "id": recorded["stock_item"]["id"], "quantity": 9}),
        )
        .await;
    assert_eq!(code, StatusCode::OK);

    let (code, body) = srv.get("acme", "/inventory/widgets").await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test(flavor = "multi_thread")]
async fn threshold_migration_runs_over_existing_items() {
    let srv = TestServer::spawn().await;
    let product = srv.create("acme", json!({"action": "product", "sku": "T-1", "name": "Thing"})).await;
    let location = srv.create("acme", json!({"action": "location", "name": "Back room"})).await;
    srv.create(
        "acme",
        json!({
            "action": "stock-item",
            "product_id": product["id"],
            "location_id": location["id"],
            "quantity": 15,
            "average_cost": "3.00"
        }),
    )
    .await;

    let (code, body) = srv.post("acme", json!({"action": "settings", "low_stock_threshold": 20})).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["data"]["low_stock_threshold"], json!(20));

    let (code, body) = srv.post("acme", json!({"action": "migrate-thresholds"})).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["data"]["updated"], json!(1));

    let items = srv
        .get_eventually("acme", "/inventory/items", |d| {
            d.as_array()
                .is_some_and(|a| a.iter().any(|i| i["low_stock_threshold"] == json!(20)))
        })
        .await;
    assert_eq!(items[0]["status"], json!("low_stock"));

    let (_, settings) = srv.get("acme", "/inventory/settings").await;
    assert_eq!(settings["data"]["low_stock_threshold"], json!(20));
}

#[tokio::test(flavor = "multi_thread")]
async fn organizations_do_not_see_each_other() {
    let srv = TestServer::spawn().await;
    let product = srv.create("acme", json!({"action": "product", "sku": "X-1", "name": "Xylo"})).await;
    let location = srv.create("acme", json!({"action": "location", "name": "Dock"})).await;
    srv.create(
        "acme",
        json!({
            "action": "movement",
            "product_id": product["id"],
            "location_id": location["id"],
            "movement_type": "stock_in",
            "quantity": 2,
            "unit_cost": "1.00"
        }),
    )
    .await;
    srv.get_eventually("acme", "/inventory/items", |d| len(d) == 1).await;

    let (_, body) = srv.get("globex", "/inventory/items").await;
    assert_eq!(len(&body["data"]), 0);
    let (_, body) = srv.get("globex", "/inventory/products").await;
    assert_eq!(len(&body["data"]), 0);

    // Acme's product is unknown to globex.
    let (code, _) = srv
        .post(
            "globex",
            json!({
                "action": "movement",
                "product_id": product["id"],
                "location_id": location["id"],
                "movement_type": "stock_in",
                "quantity": 1,
                "unit_cost": "1.00"
            }),
        )
        .await;
    assert_eq!(code, StatusCode::NOT_FOUND);
}
