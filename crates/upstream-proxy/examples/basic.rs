use axum::Router;
use upstream_proxy::HttpReverseProxyService;

#[tokio::main]
async fn main() {
    let upstream = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:4943".to_owned());

    let app = Router::new().fallback_service(HttpReverseProxyService::new_http(upstream.as_str()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:4000")
        .await
        .unwrap();

    println!(
        "forwarding http://{} to {}",
        listener.local_addr().unwrap(),
        upstream
    );

    axum::serve(listener, app).await.unwrap();
}
