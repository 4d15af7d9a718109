//! Integration tests for the countries backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    routing::get,
    Router,
};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::auth::{hash_password, TokenIssuer};
use crate::db::{init_database, Repository};
use crate::errors::AppError;
use crate::models::CountryData;
use crate::sync::{run_startup_sync, CountrySource, Synchronizer};
use crate::{create_router, AppState};

const TEST_JWT_SECRET: &[u8] = b"test-secret-for-integration-tests";
const ADMIN_USERNAME: &str = "admin";
const ADMIN_PASSWORD: &str = "admin-password";

/// Stand-in for the external country API.
struct Upstream {
    url: String,
    reply: Arc<Mutex<(u16, String)>>,
}

impl Upstream {
    async fn spawn() -> Self {
        let reply = Arc::new(Mutex::new((200u16, "[]".to_string())));
        let shared = reply.clone();

        let app = Router::new().route(
            "/v3.1/all",
            get(move || {
                let shared = shared.clone();
                async move {
                    let (status, body) = shared.lock().unwrap().clone();
                    (
                        StatusCode::from_u16(status).unwrap(),
                        [(header::CONTENT_TYPE, "application/json")],
                        body,
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind upstream");
        let addr = listener.local_addr().expect("Failed to get upstream addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Upstream {
            url: format!("http://{}/v3.1/all", addr),
            reply,
        }
    }

    fn serve_countries(&self, countries: Value) {
        *self.reply.lock().unwrap() = (200, countries.to_string());
    }

    fn serve_raw(&self, status: u16, body: &str) {
        *self.reply.lock().unwrap() = (status, body.to_string());
    }
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    anonymous: Client,
    base_url: String,
    refresh: String,
    upstream: Upstream,
    state: AppState,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        repo.upsert_user(ADMIN_USERNAME, "admin@example.com", &hash_password(ADMIN_PASSWORD))
            .await
            .expect("Failed to create admin");

        let upstream = Upstream::spawn().await;
        let source = CountrySource::new(upstream.url.clone(), Duration::from_secs(2))
            .expect("Failed to build source");
        let sync = Arc::new(Synchronizer::new(repo.clone(), source));
        let tokens = Arc::new(TokenIssuer::new(
            TEST_JWT_SECRET,
            Duration::from_secs(300),
            Duration::from_secs(3600),
        ));

        let state = AppState { repo, sync, tokens };
        let app = create_router(state.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let anonymous = Client::new();
        let login: Value = anonymous
            .post(format!("{}/api/login/", base_url))
            .json(&json!({ "username": ADMIN_USERNAME, "password": ADMIN_PASSWORD }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let access = login["data"]["access"].as_str().expect("No access token");
        let refresh = login["data"]["refresh"].as_str().expect("No refresh token");

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", access).parse().unwrap(),
        );

        TestFixture {
            client: Client::builder().default_headers(headers).build().unwrap(),
            anonymous,
            base_url,
            refresh: refresh.to_string(),
            upstream,
            state,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn sync(&self) -> Value {
        let resp = self
            .client
            .post(self.url("/api/countries/sync/"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }

    async fn list(&self, query: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(self.url(&format!("/api/countries/{}", query)))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    /// ID of the stored country with this exact name.
    async fn id_of(&self, name: &str) -> i64 {
        let (_, body) = self
            .list(&format!("?include_deleted=true&page_size=100&name={}", name))
            .await;
        body["data"]["results"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .and_then(|c| c["id"].as_i64())
            .unwrap_or_else(|| panic!("{} is not stored", name))
    }
}

/// Upstream-shaped record.
fn raw_country(name: &str, region: &str, subregion: &str, languages: &[&str]) -> Value {
    let languages: serde_json::Map<String, Value> = languages
        .iter()
        .enumerate()
        .map(|(i, lang)| (format!("l{}", i), json!(lang)))
        .collect();
    json!({
        "name": { "common": name, "official": format!("Republic of {}", name) },
        "capital": [format!("{} City", name)],
        "region": region,
        "subregion": subregion,
        "population": 1_000_000,
        "area": 1234.5,
        "languages": languages,
        "currencies": { "CUR": { "name": "Coin", "symbol": "c" } },
        "timezones": ["UTC+01:00"],
        "flags": { "png": format!("https://flags.example/{}.png", name), "svg": "ignored" },
        "cca2": "XX"
    })
}

fn europe_and_asia() -> Value {
    json!([
        raw_country("Spain", "Europe", "Southern Europe", &["Spanish"]),
        raw_country("France", "Europe", "Western Europe", &["French"]),
        raw_country("Belgium", "Europe", "Western Europe", &["Dutch", "French", "German"]),
        raw_country("Japan", "Asia", "Eastern Asia", &["Japanese"]),
        raw_country("Mongolia", "Asia", "Eastern Asia", &["Mongolian"]),
    ])
}

fn names(body: &Value) -> Vec<String> {
    body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .anonymous
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_countries_require_access_token() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .anonymous
        .get(fixture.url("/api/countries/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = fixture
        .anonymous
        .get(fixture.url("/api/countries/"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // A refresh token is not an access token
    let resp = fixture
        .anonymous
        .get(fixture.url("/api/countries/"))
        .bearer_auth(&fixture.refresh)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .anonymous
        .post(fixture.url("/api/login/"))
        .json(&json!({ "username": ADMIN_USERNAME, "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .anonymous
        .post(fixture.url("/api/login/"))
        .json(&json!({ "username": "  ", "password": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"]["field"], "username");

    // Usernames match case-insensitively
    let resp = fixture
        .anonymous
        .post(fixture.url("/api/login/"))
        .json(&json!({ "username": "ADMIN", "password": ADMIN_PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["user"]["username"], ADMIN_USERNAME);
    assert!(body["data"]["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_refresh_and_logout() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .anonymous
        .post(fixture.url("/api/token/refresh/"))
        .json(&json!({ "refresh": fixture.refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let new_access = body["data"]["access"].as_str().unwrap();

    let resp = fixture
        .anonymous
        .get(fixture.url("/api/countries/"))
        .bearer_auth(new_access)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Logout requires the refresh token parameter
    let resp = fixture
        .client
        .get(fixture.url("/api/logout/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .client
        .get(fixture.url("/api/logout/"))
        .query(&[("refresh_token", fixture.refresh.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The revoked refresh token no longer mints access tokens
    let resp = fixture
        .anonymous
        .post(fixture.url("/api/token/refresh/"))
        .json(&json!({ "refresh": fixture.refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_sync_populates_and_is_idempotent() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());

    let first = fixture.sync().await;
    assert_eq!(first["created"], 5);
    assert_eq!(first["updated"], 0);
    assert!(first.get("aborted").is_none());

    let second = fixture.sync().await;
    assert_eq!(second["created"], 0);
    assert_eq!(second["updated"], 5);

    let (status, body) = fixture.list("").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["count"], 5);

    let belgium = body["data"]["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "Belgium")
        .unwrap()
        .clone();
    assert_eq!(belgium["capital"], "Belgium City");
    assert_eq!(belgium["languages"], json!(["Dutch", "French", "German"]));
    assert_eq!(belgium["currencies"], json!(["Coin"]));
    assert_eq!(belgium["flag"], "https://flags.example/Belgium.png");
    assert_eq!(belgium["countryCode"], "XX");
    assert_eq!(belgium["isActive"], true);
}

#[tokio::test]
async fn test_sync_overwrites_changed_fields() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    let mut changed = raw_country("Japan", "Asia", "Eastern Asia", &["Japanese"]);
    changed["population"] = json!(125_000_000);
    changed["capital"] = json!(["Tokyo"]);
    fixture.upstream.serve_countries(json!([changed]));
    let report = fixture.sync().await;
    assert_eq!(report["created"], 0);
    assert_eq!(report["updated"], 1);

    let id = fixture.id_of("Japan").await;
    let resp = fixture
        .client
        .get(fixture.url(&format!("/api/countries/{}/", id)))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["population"], 125_000_000);
    assert_eq!(body["data"]["capital"], "Tokyo");
}

#[tokio::test]
async fn test_sync_collapses_duplicate_names() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(json!([
        raw_country("Georgia", "Asia", "Western Asia", &["Georgian"]),
        raw_country("Georgia", "Europe", "Eastern Europe", &["Georgian"]),
    ]));

    let report = fixture.sync().await;
    assert_eq!(report["created"], 1);
    assert_eq!(report["updated"], 1);

    let (_, body) = fixture.list("?name=georgia").await;
    assert_eq!(body["data"]["count"], 1);
    assert_eq!(body["data"]["results"][0]["region"], "Europe");
}

#[tokio::test]
async fn test_sync_tolerates_partial_records() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(json!([
        raw_country("Norway", "Europe", "Northern Europe", &["Norwegian"]),
        { "name": { "common": "Bouvet Island" }, "region": "Antarctic", "population": 0 },
        "this is not a country",
        { "capital": ["Nameless"] }
    ]));

    let report = fixture.sync().await;
    assert_eq!(report["created"], 2);
    assert_eq!(report["skipped"], 2);

    let id = fixture.id_of("Bouvet Island").await;
    let resp = fixture
        .client
        .get(fixture.url(&format!("/api/countries/{}/", id)))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["capital"], "");
    assert_eq!(body["data"]["languages"], json!([]));
    assert_eq!(body["data"]["area"], 0.0);
}

#[tokio::test]
async fn test_sync_aborts_on_upstream_failure() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    fixture.upstream.serve_raw(503, r#"{"message": "down"}"#);
    let report = fixture.sync().await;
    assert_eq!(report["created"], 0);
    assert_eq!(report["updated"], 0);
    assert!(report["aborted"].as_str().unwrap().contains("503"));

    fixture.upstream.serve_raw(200, "{ not json");
    let report = fixture.sync().await;
    assert!(report["aborted"].as_str().unwrap().contains("decode"));

    fixture.upstream.serve_raw(200, "[]");
    let report = fixture.sync().await;
    assert!(report["aborted"].is_string());

    let (_, body) = fixture.list("").await;
    assert_eq!(body["data"]["count"], 5);
}

#[tokio::test]
async fn test_startup_sync_strictness() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_raw(500, "oops");

    // Strict boot treats an unreachable source as fatal
    let strict = run_startup_sync(&fixture.state.sync, true).await;
    assert!(matches!(strict, Err(AppError::Upstream(_))));

    // Lenient boot logs and carries on
    let lenient = run_startup_sync(&fixture.state.sync, false).await.unwrap();
    assert!(lenient.aborted.is_some());
    assert_eq!(lenient.created, 0);

    fixture.upstream.serve_countries(europe_and_asia());
    let report = run_startup_sync(&fixture.state.sync, true).await.unwrap();
    assert_eq!(report.created, 5);
}

#[tokio::test]
async fn test_sync_batch_is_atomic_on_conflict() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    // "Spain" was created after the snapshot; the batch must not half-apply.
    let stale_plan = vec![
        CountryData {
            name: "Portugal".to_string(),
            ..Default::default()
        },
        CountryData {
            name: "Spain".to_string(),
            ..Default::default()
        },
    ];
    let result = fixture.state.repo.apply_sync_batch(&stale_plan, &[]).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let (_, body) = fixture.list("?include_deleted=true").await;
    assert_eq!(body["data"]["count"], 5);
    assert!(!names(&body).contains(&"Portugal".to_string()));
}

#[tokio::test]
async fn test_sync_keeps_soft_deleted_state() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    let id = fixture.id_of("Spain").await;
    fixture
        .client
        .delete(fixture.url(&format!("/api/countries/{}/", id)))
        .send()
        .await
        .unwrap();

    let report = fixture.sync().await;
    assert_eq!(report["created"], 0);

    let (_, body) = fixture.list("").await;
    assert!(!names(&body).contains(&"Spain".to_string()));
}

#[tokio::test]
async fn test_region_filter() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    // Created after the sync, so its ID is the highest but its name sorts first
    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .json(&json!({
            "name": "Albania",
            "capital": "Tirana",
            "region": "Europe",
            "subregion": "Southeast Europe",
            "population": 2800000,
            "area": 28748.0,
            "languages": ["Albanian"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Soft-deleted countries stay out of the default scope
    let spain = fixture.id_of("Spain").await;
    fixture
        .client
        .delete(fixture.url(&format!("/api/countries/{}/", spain)))
        .send()
        .await
        .unwrap();

    let france = fixture.id_of("France").await;
    let (status, body) = fixture
        .list(&format!("?region_country_id={}", france))
        .await;
    assert_eq!(status, 200);
    assert_eq!(names(&body), vec!["Albania", "Belgium", "France"]);

    let (_, body) = fixture
        .list(&format!("?region_country_id={}&include_deleted=true", france))
        .await;
    assert_eq!(names(&body), vec!["Albania", "Belgium", "France", "Spain"]);

    let (status, body) = fixture.list("?region_country_id=99999").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_subregion_filter_and_empty_reference() {
    let fixture = TestFixture::new().await;
    let mut antarctica = raw_country("Antarctica", "Antarctic", "", &["None"]);
    antarctica["subregion"] = json!(null);
    let mut payload = europe_and_asia();
    payload.as_array_mut().unwrap().push(antarctica);
    fixture.upstream.serve_countries(payload);
    fixture.sync().await;

    let belgium = fixture.id_of("Belgium").await;
    let (_, body) = fixture
        .list(&format!("?subregion_country_id={}", belgium))
        .await;
    assert_eq!(names(&body), vec!["Belgium", "France"]);

    // A reference without a subregion matches nothing rather than everything
    let antarctica = fixture.id_of("Antarctica").await;
    let (status, body) = fixture
        .list(&format!("?subregion_country_id={}", antarctica))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["count"], 0);
    assert!(names(&body).is_empty());

    // Filters compose
    let (_, body) = fixture
        .list(&format!("?subregion_country_id={}&language=german", belgium))
        .await;
    assert_eq!(names(&body), vec!["Belgium"]);
}

#[tokio::test]
async fn test_language_and_name_filters() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    let (_, body) = fixture.list("?language=FRENCH").await;
    assert_eq!(names(&body), vec!["Belgium", "France"]);

    let (_, body) = fixture.list("?name=AN").await;
    assert_eq!(names(&body), vec!["France", "Japan"]);

    let (status, body) = fixture.list("?language=%20%20").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "language");

    let (status, body) = fixture.list("?name=").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["details"]["field"], "name");
}

#[tokio::test]
async fn test_pagination() {
    let fixture = TestFixture::new().await;
    let payload: Vec<Value> = (1..=30)
        .map(|i| raw_country(&format!("Country {:02}", i), "Oceania", "Polynesia", &["Tongan"]))
        .collect();
    fixture.upstream.serve_countries(Value::Array(payload));
    fixture.sync().await;

    let (status, body) = fixture.list("").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["count"], 30);
    assert_eq!(body["data"]["pageSize"], 25);
    assert_eq!(body["data"]["totalPages"], 2);
    assert_eq!(names(&body).len(), 25);
    assert_eq!(names(&body)[0], "Country 01");

    let (_, body) = fixture.list("?page=2").await;
    assert_eq!(
        names(&body),
        vec!["Country 26", "Country 27", "Country 28", "Country 29", "Country 30"]
    );

    let (_, body) = fixture.list("?page=last").await;
    assert_eq!(body["data"]["page"], 2);

    let (status, body) = fixture.list("?page=3").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["message"], "Invalid page number.");

    let (status, _) = fixture.list("?page=0").await;
    assert_eq!(status, 404);

    let (_, body) = fixture.list("?page_size=7&page=5").await;
    assert_eq!(names(&body), vec!["Country 29", "Country 30"]);

    let (_, body) = fixture.list("?page_size=1000").await;
    assert_eq!(body["data"]["pageSize"], 100);
    assert_eq!(names(&body).len(), 30);
}

#[tokio::test]
async fn test_soft_delete_and_restore() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    let id = fixture.id_of("Japan").await;
    let url = fixture.url(&format!("/api/countries/{}/", id));
    let before: Value = fixture.client.get(&url).send().await.unwrap().json().await.unwrap();

    let resp = fixture.client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), 204);

    // Deleting again is harmless
    let resp = fixture.client.delete(&url).send().await.unwrap();
    assert_eq!(resp.status(), 204);

    let (_, body) = fixture.list("").await;
    assert!(!names(&body).contains(&"Japan".to_string()));

    // Still addressable by ID
    let deleted: Value = fixture.client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(deleted["data"]["isActive"], false);
    assert!(deleted["data"]["deletedAt"].is_string());

    let restore_url = fixture.url(&format!("/api/countries/{}/restore/", id));
    let resp = fixture.client.post(&restore_url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let restored: Value = resp.json().await.unwrap();
    assert_eq!(restored["data"]["isActive"], true);
    assert!(restored["data"].get("deletedAt").is_none());
    for field in [
        "name", "capital", "region", "subregion", "population", "area", "languages",
        "currencies", "timezones", "flag", "countryCode", "createdAt",
    ] {
        assert_eq!(restored["data"][field], before["data"][field], "{} changed", field);
    }

    let resp = fixture.client.post(&restore_url).send().await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("already active"));

    let resp = fixture
        .client
        .delete(fixture.url("/api/countries/424242/"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_create_validation() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .json(&json!({
            "name": "Atlantis",
            "population": -5,
            "languages": ["Atlantean"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"]["field"], "population");

    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .json(&json!({ "name": "Atlantis", "population": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let valid = json!({
        "name": " Atlantis ",
        "population": 5000,
        "area": 12.5,
        "languages": ["Atlantean"],
        "countryCode": "at"
    });
    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .json(&valid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Atlantis");
    assert_eq!(body["data"]["countryCode"], "AT");
    assert_eq!(body["data"]["isActive"], true);
    assert!(body["data"]["id"].is_number());

    // Names are unique
    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .json(&valid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"]["field"], "name");
}

#[tokio::test]
async fn test_partial_update() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(europe_and_asia());
    fixture.sync().await;

    let id = fixture.id_of("Mongolia").await;
    let url = fixture.url(&format!("/api/countries/{}/", id));

    let resp = fixture
        .client
        .patch(&url)
        .json(&json!({ "population": 3400000, "timezones": ["UTC+07:00", "UTC+08:00"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["population"], 3400000);
    assert_eq!(body["data"]["timezones"], json!(["UTC+07:00", "UTC+08:00"]));
    assert_eq!(body["data"]["capital"], "Mongolia City");

    let resp = fixture
        .client
        .patch(&url)
        .json(&json!({ "area": 1.0e9 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"]["field"], "area");

    // Renaming onto another country's name is refused
    let resp = fixture
        .client
        .patch(&url)
        .json(&json!({ "name": "Japan" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .client
        .patch(fixture.url("/api/countries/424242/"))
        .json(&json!({ "population": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_partial_update_of_synced_record_with_punctuation() {
    let fixture = TestFixture::new().await;
    let mut guinea_bissau = raw_country("Guinea-Bissau", "Africa", "Western Africa", &["Portuguese"]);
    guinea_bissau["capital"] = json!(["Bissau, Old Town"]);
    fixture.upstream.serve_countries(json!([guinea_bissau]));
    fixture.sync().await;

    let id = fixture.id_of("Guinea-Bissau").await;
    let resp = fixture
        .client
        .patch(fixture.url(&format!("/api/countries/{}/", id)))
        .json(&json!({ "population": 2100000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["name"], "Guinea-Bissau");
    assert_eq!(body["data"]["capital"], "Bissau, Old Town");
    assert_eq!(body["data"]["population"], 2100000);

    // Supplied fields are still checked
    let resp = fixture
        .client
        .patch(fixture.url(&format!("/api/countries/{}/", id)))
        .json(&json!({ "capital": "Bissau-2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"]["field"], "capital");
}

#[tokio::test]
async fn test_filters_fold_non_ascii_case() {
    let fixture = TestFixture::new().await;
    fixture.upstream.serve_countries(json!([
        raw_country("Åland Islands", "Europe", "Northern Europe", &["Swedish"]),
        raw_country("Türkiye", "Asia", "Western Asia", &["Türkçe"]),
        raw_country("Réunion", "Africa", "Eastern Africa", &["French"]),
    ]));
    fixture.sync().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/countries/"))
        .query(&[("name", "åland")])
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(names(&body), vec!["Åland Islands"]);

    let resp = fixture
        .client
        .get(fixture.url("/api/countries/"))
        .query(&[("name", "RÉUNION")])
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(names(&body), vec!["Réunion"]);

    let resp = fixture
        .client
        .get(fixture.url("/api/countries/"))
        .query(&[("language", "TÜRKÇE")])
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(names(&body), vec!["Türkiye"]);

    // Manual writes keep the folded columns current
    let id = fixture.id_of("Réunion").await;
    fixture
        .client
        .patch(fixture.url(&format!("/api/countries/{}/", id)))
        .json(&json!({ "languages": ["Créole Réunionnais"] }))
        .send()
        .await
        .unwrap();
    let resp = fixture
        .client
        .get(fixture.url("/api/countries/"))
        .query(&[("language", "CRÉOLE RÉUNIONNAIS")])
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(names(&body), vec!["Réunion"]);
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/countries/"))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    // Wrong field type
    let resp = fixture
        .anonymous
        .post(fixture.url("/api/login/"))
        .json(&json!({ "username": 42, "password": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}
