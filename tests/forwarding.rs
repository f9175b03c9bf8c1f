use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use canister_proxy::{Binding, PortRouter, RouterError};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: String) -> String {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    format!("{method} {uri} {forwarded_for} {body}")
}

async fn spawn_replica() -> SocketAddr {
    let app = Router::new()
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such asset") }))
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    addr
}

async fn spawn_router(canister_id: &str, replica_host: &str) -> SocketAddr {
    let binding = Binding {
        canister_id: canister_id.to_owned(),
        port: 4943,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let router = PortRouter::new(binding, replica_host).listen_on(listener);
    let addr = router.local_addr().unwrap();

    tokio::spawn(async move { router.serve().await.unwrap() });

    addr
}

fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn send(method: Method, url: String, body: &'static str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(url)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap();

    let response = client().request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn forwards_with_canister_id_appended() {
    let replica = spawn_replica().await;
    let router = spawn_router("ryjl3-tyaaa", &format!("http://{replica}")).await;

    let (status, body) = send(Method::GET, format!("http://{router}/foo?bar=1"), "").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "GET /foo?bar=1&canisterId=ryjl3-tyaaa 127.0.0.1 ");
}

#[tokio::test]
async fn starts_query_and_keeps_method_and_body() {
    let replica = spawn_replica().await;
    let router = spawn_router("xyz", &format!("http://{replica}/")).await;

    let (status, body) = send(
        Method::POST,
        format!("http://{router}/api/v2/call"),
        "payload",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "POST /api/v2/call?canisterId=xyz 127.0.0.1 payload");
}

#[tokio::test]
async fn relays_upstream_status() {
    let replica = spawn_replica().await;
    let router = spawn_router("xyz", &format!("http://{replica}")).await;

    let (status, body) = send(Method::GET, format!("http://{router}/missing"), "").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "no such asset");
}

#[tokio::test]
async fn unreachable_replica_is_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let replica = closed.local_addr().unwrap();
    drop(closed);

    let router = spawn_router("xyz", &format!("http://{replica}")).await;

    let (status, body) = send(Method::GET, format!("http://{router}/"), "").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains(&replica.to_string()), "{body}");
}

#[tokio::test]
async fn taken_port_fails_only_that_router() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let router = PortRouter::new(
        Binding {
            canister_id: "abc".to_owned(),
            port,
        },
        "http://127.0.0.1:8000",
    );

    match router.bind().await {
        Err(RouterError::Bind {
            canister_id,
            port: failed,
            ..
        }) => {
            assert_eq!(canister_id, "abc");
            assert_eq!(failed, port);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("bound a port that is already taken"),
    }

    let replica = spawn_replica().await;
    let sibling = spawn_router("def", &format!("http://{replica}")).await;
    let (status, _) = send(Method::GET, format!("http://{sibling}/"), "").await;
    assert_eq!(status, StatusCode::OK);
}
