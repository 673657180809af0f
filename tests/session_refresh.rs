//! End-to-end token refresh against a mock storefront API.

use std::time::Duration;

use httpmock::MockServer;
use url::Url;
use vitrine::{
    Storefront,
    cache::CacheConfig,
    config::ApiSettings,
    session::SessionState,
};
use vitrine_api_types::LoginInput;

const LOGIN_BODY: &str =
    r#"{"id":1,"username":"ada","roles":["ROLE_USER"],"accessToken":"tok-old"}"#;
const EXPIRED_BODY: &str = r#"{"code":401,"message":"Invalid Access Token"}"#;

fn storefront(server: &MockServer) -> Storefront {
    let api = ApiSettings {
        base_url: Url::parse(&format!("{}/api/", server.base_url())).expect("base url"),
        request_timeout: Duration::from_secs(5),
    };
    Storefront::connect(&api, CacheConfig::default()).expect("storefront")
}

fn credentials() -> LoginInput {
    LoginInput {
        email: "ada@example.com".into(),
        password: "correct-horse".into(),
    }
}

fn product_body(id: i64) -> String {
    format!(r#"{{"id":{id},"name":"Lamp {id}","price":19.5}}"#)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expired_token_is_refreshed_once_for_concurrent_requests() {
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method("POST").path("/api/login");
        then.status(200)
            .header("content-type", "application/json")
            .body(LOGIN_BODY);
    });
    let refresh = server.mock(|when, then| {
        when.method("GET").path("/api/refresh");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"accessToken":"tok-new"}"#);
    });
    let mut expired = Vec::new();
    let mut served = Vec::new();
    for id in 1..=3 {
        let path = format!("/api/products/{id}");
        expired.push(server.mock(|when, then| {
            when.method("GET")
                .path(path.as_str())
                .header("authorization", "Bearer tok-old");
            then.status(401)
                .header("content-type", "application/json")
                .body(EXPIRED_BODY);
        }));
        served.push(server.mock(|when, then| {
            when.method("GET")
                .path(path.as_str())
                .header("authorization", "Bearer tok-new");
            then.status(200)
                .header("content-type", "application/json")
                .body(product_body(id));
        }));
    }

    let storefront = storefront(&server);
    let identity = storefront.login(&credentials()).await.expect("login");
    assert_eq!(identity.username, "ada");

    let (first, second, third) = tokio::join!(
        storefront.product(1),
        storefront.product(2),
        storefront.product(3),
    );

    assert_eq!(first.expect("product 1").name, "Lamp 1");
    assert_eq!(second.expect("product 2").name, "Lamp 2");
    assert_eq!(third.expect("product 3").name, "Lamp 3");
    login.assert();
    refresh.assert_hits(1);
    for mock in &served {
        mock.assert_hits(1);
    }
    assert_eq!(storefront.session().access_token().as_deref(), Some("tok-new"));
    assert_eq!(
        storefront.session().identity().map(|identity| identity.username),
        Some("ada".to_string())
    );
}

#[tokio::test]
async fn failed_refresh_signs_out_and_returns_original_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("POST").path("/api/login");
        then.status(200)
            .header("content-type", "application/json")
            .body(LOGIN_BODY);
    });
    let refresh = server.mock(|when, then| {
        when.method("GET").path("/api/refresh");
        then.status(401)
            .header("content-type", "application/json")
            .body(r#"{"code":401,"message":"Refresh token expired"}"#);
    });
    server.mock(|when, then| {
        when.method("GET").path("/api/users/1");
        then.status(401)
            .header("content-type", "application/json")
            .body(EXPIRED_BODY);
    });

    let storefront = storefront(&server);
    storefront.login(&credentials()).await.expect("login");
    let mut states = storefront.session().subscribe();

    let err = storefront.user(1).await.expect_err("signed out");

    refresh.assert_hits(1);
    assert!(
        err.as_transport()
            .is_some_and(|transport| transport.is_invalid_access_token())
    );
    assert!(!storefront.session().is_authenticated());
    let state = states.borrow_and_update().clone();
    assert!(matches!(state, SessionState::Unauthenticated));
}

#[tokio::test]
async fn writes_refetch_affected_reads() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("POST").path("/api/login");
        then.status(200)
            .header("content-type", "application/json")
            .body(LOGIN_BODY);
    });
    let read = server.mock(|when, then| {
        when.method("GET")
            .path("/api/users/5")
            .header("authorization", "Bearer tok-old");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":5,"username":"grace","isActive":true}"#);
    });
    let write = server.mock(|when, then| {
        when.method("PATCH")
            .path("/api/users/5/is-active")
            .header("authorization", "Bearer tok-old")
            .body_includes("\"isActive\":false");
        then.status(204);
    });

    let storefront = storefront(&server);
    storefront.login(&credentials()).await.expect("login");

    storefront.user(5).await.expect("first read");
    storefront.user(5).await.expect("cached read");
    read.assert_hits(1);

    storefront.set_user_active(5, false).await.expect("write");
    write.assert();

    storefront.user(5).await.expect("read after write");
    read.assert_hits(2);
}

#[tokio::test]
async fn logout_clears_the_session_even_when_the_server_fails() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("POST").path("/api/login");
        then.status(200)
            .header("content-type", "application/json")
            .body(LOGIN_BODY);
    });
    let logout = server.mock(|when, then| {
        when.method("POST")
            .path("/api/logout")
            .header("authorization", "Bearer tok-old");
        then.status(500).body("boom");
    });

    let storefront = storefront(&server);
    storefront.login(&credentials()).await.expect("login");
    storefront.logout().await;

    logout.assert();
    assert!(!storefront.session().is_authenticated());
    assert_eq!(storefront.session().access_token(), None);
}

#[tokio::test]
async fn start_restores_the_session_once() {
    let server = MockServer::start();
    let refresh = server.mock(|when, then| {
        when.method("GET").path("/api/refresh");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"id":2,"username":"grace","roles":[],"accessToken":"tok-cookie"}"#);
    });
    let read = server.mock(|when, then| {
        when.method("GET")
            .path("/api/products/4")
            .header("authorization", "Bearer tok-cookie");
        then.status(200)
            .header("content-type", "application/json")
            .body(product_body(4));
    });

    let api = ApiSettings {
        base_url: Url::parse(&format!("{}/api/", server.base_url())).expect("base url"),
        request_timeout: Duration::from_secs(5),
    };
    let storefront = Storefront::start(&api, CacheConfig::default())
        .await
        .expect("storefront");

    assert_eq!(
        storefront.session().identity().map(|identity| identity.username),
        Some("grace".to_string())
    );
    storefront.product(4).await.expect("product");
    refresh.assert_hits(1);
    read.assert();
}
