//! End-to-end authentication tests over real sockets.

use std::io::Write;
use std::sync::LazyLock;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use gantry_core::AppKeyTable;
use gantry_server::{current_consumer, HttpError, Microservice, MicroserviceConfig};

static TEST_KEYS: LazyLock<(String, String)> = LazyLock::new(|| {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
    let public = RsaPublicKey::from(&private);
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .expect("private pem")
        .to_string();
    let public_pem = public.to_public_key_pem(LineEnding::LF).expect("public pem");
    (private_pem, public_pem)
});

fn sign(claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(TEST_KEYS.0.as_bytes()).unwrap();
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
}

fn ephemeral_config() -> MicroserviceConfig {
    MicroserviceConfig {
        port: 0,
        address: Some("127.0.0.1".to_string()),
        ..MicroserviceConfig::default()
    }
}

fn config_with_app_key(token: &str, app: &str) -> MicroserviceConfig {
    let mut table = AppKeyTable::new("", vec!["admin".to_string()]);
    table.insert(app, token);
    MicroserviceConfig {
        app_keys: table,
        ..ephemeral_config()
    }
}

fn identity_routes() -> Router {
    Router::new()
        .route(
            "/whoami",
            get(|| async {
                current_consumer()
                    .unwrap()
                    .map_or("anonymous".to_string(), |consumer| consumer.id)
            }),
        )
        .route(
            "/secure",
            get(|| async {
                current_consumer()
                    .unwrap()
                    .map(|consumer| consumer.id)
                    .ok_or_else(HttpError::unauthorized)
            }),
        )
        .route(
            "/slow-whoami",
            get(|| async {
                let before = current_consumer().unwrap().map_or_else(
                    || "anonymous".to_string(),
                    |consumer| consumer.id,
                );
                tokio::time::sleep(Duration::from_millis(100)).await;
                let after = current_consumer()
                    .unwrap()
                    .map_or_else(|| "anonymous".to_string(), |consumer| consumer.id);
                assert_eq!(before, after, "identity must be stable across awaits");
                after
            }),
        )
}

async fn start(config: MicroserviceConfig, routes: Router) -> (Microservice, String) {
    let mut service = Microservice::with_routes(config, routes);
    let bound = service.start().await.expect("start");
    (service, format!("http://{bound}"))
}

#[tokio::test]
async fn empty_configuration_yields_404_for_any_path() {
    let (mut service, base) = start(ephemeral_config(), Router::new()).await;

    let response = reqwest::get(format!("{base}/anything/at/all"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], 404);
    assert_eq!(body["reason"], "No route found for /anything/at/all");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn known_app_key_resolves_identity_and_misses_routes_with_404() {
    let (mut service, base) = start(config_with_app_key("qwerty", "test"), Router::new()).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/no/route/here"))
        .bearer_auth("qwerty")
        .send()
        .await
        .unwrap();
    // Identity resolution succeeded, so the miss is a 404, not a 401.
    assert_eq!(response.status(), 404);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_bearer_is_rejected_with_challenge() {
    let (mut service, base) = start(config_with_app_key("qwerty", "test"), Router::new()).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/no/route/here"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "status": 401, "reason": "Unauthorized" }));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn app_key_identity_is_visible_to_handlers() {
    let (mut service, base) =
        start(config_with_app_key("qwerty", "test"), identity_routes()).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/whoami"))
        .bearer_auth("qwerty")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "test");

    // The query-parameter fallback resolves the same identity.
    let response = client
        .get(format!("{base}/whoami?access_token=qwerty"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "test");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn forwarding_lets_unknown_bearers_through_unauthenticated() {
    let config = MicroserviceConfig {
        forward_unknown_bearer: true,
        ..config_with_app_key("qwerty", "test")
    };
    let (mut service, base) = start(config, identity_routes()).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/whoami"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "anonymous");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn anonymous_requests_always_pass_the_gate() {
    let (mut service, base) =
        start(config_with_app_key("qwerty", "test"), identity_routes()).await;

    let response = reqwest::get(format!("{base}/whoami")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "anonymous");

    service.stop().await.unwrap();
}

fn jwt_config(public_pem: &str) -> (MicroserviceConfig, tempfile::NamedTempFile) {
    let mut key_file = tempfile::NamedTempFile::new().unwrap();
    key_file.write_all(public_pem.as_bytes()).unwrap();
    let config = MicroserviceConfig {
        jwt_public_key: Some(key_file.path().to_path_buf()),
        ..ephemeral_config()
    };
    (config, key_file)
}

#[tokio::test]
async fn valid_signed_token_authenticates_a_protected_route() {
    let (config, _key_file) = jwt_config(&TEST_KEYS.1);
    let (mut service, base) = start(config, identity_routes()).await;

    let token = sign(&json!({
        "consumer": {
            "id": "u-7",
            "roles": ["reader"],
            "attr": { "name": "Ada", "type": "user" }
        },
        "exp": 4_102_444_800_u64
    }));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/secure"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "u-7");

    // Without a credential the same route rejects.
    let response = client.get(format!("{base}/secure")).send().await.unwrap();
    assert_eq!(response.status(), 401);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn tampered_signed_token_is_a_hard_401() {
    let (config, _key_file) = jwt_config(&TEST_KEYS.1);
    let (mut service, base) = start(config, identity_routes()).await;

    let token = sign(&json!({ "consumer": null }));
    let mut segments: Vec<String> = token.split('.').map(str::to_string).collect();
    segments[2] = format!("AAAA{}", segments[2]);
    let tampered = segments.join(".");

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/whoami"))
        .bearer_auth(&tampered)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn opaque_token_with_jwt_only_config_hits_the_gate() {
    let (config, _key_file) = jwt_config(&TEST_KEYS.1);
    let (mut service, base) = start(config, identity_routes()).await;

    // Not a JWS shape: the signed-token resolver skips silently, then
    // the gate rejects the unresolved credential.
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{base}/whoami"))
        .bearer_auth("opaque-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_do_not_leak_identity() {
    let (mut service, base) =
        start(config_with_app_key("qwerty", "test"), identity_routes()).await;

    let client = reqwest::Client::new();
    let authed = {
        let client = client.clone();
        let url = format!("{base}/slow-whoami");
        tokio::spawn(async move {
            client
                .get(url)
                .bearer_auth("qwerty")
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        })
    };
    let anonymous = {
        let client = client.clone();
        let url = format!("{base}/slow-whoami");
        tokio::spawn(async move {
            client.get(url).send().await.unwrap().text().await.unwrap()
        })
    };

    assert_eq!(authed.await.unwrap(), "test");
    assert_eq!(anonymous.await.unwrap(), "anonymous");

    service.stop().await.unwrap();
}
