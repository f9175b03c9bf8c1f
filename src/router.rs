use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo, Router};
use futures_util::future::BoxFuture;
use http::{Request, Response, StatusCode, Uri};
use http_body_util::Either;
use tokio::net::TcpListener;
use tower::Service;
use tower_http::trace::TraceLayer;
use upstream_proxy::{forward_url, ClientAddr, HttpReverseProxyService, ProxyBody};

use crate::{access_log::AccessEntry, mapping::Binding, rewrite::rewrite_target};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("could not listen on port {port} for canister '{canister_id}': {source}")]
    Bind {
        canister_id: String,
        port: u16,
        source: io::Error,
    },
    #[error("router for canister '{canister_id}' on port {port} stopped: {source}")]
    Serve {
        canister_id: String,
        port: u16,
        source: io::Error,
    },
}

/// Tower service that points every request at one canister and hands it to
/// the replica proxy.
pub struct CanisterService {
    binding: Arc<Binding>,
    proxy: HttpReverseProxyService<Body>,
}

impl CanisterService {
    pub fn new(binding: Binding, replica_host: &str) -> Self {
        Self {
            binding: Arc::new(binding),
            proxy: HttpReverseProxyService::new_http(replica_host),
        }
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl Clone for CanisterService {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

impl Service<Request<Body>> for CanisterService {
    type Response = Response<ProxyBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        <HttpReverseProxyService<Body> as Service<Request<Body>>>::poll_ready(&mut self.proxy, cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let binding = self.binding.clone();
        let mut proxy = self.proxy.clone();

        let original = request
            .uri()
            .path_and_query()
            .map_or("/", |target| target.as_str())
            .to_owned();
        let rewritten = rewrite_target(&original, &binding.canister_id);
        let forwarded = forward_url(proxy.upstream(), &rewritten);
        let method = request.method().clone();

        if let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
            let client = ClientAddr(peer.ip());
            request.extensions_mut().insert(client);
        }

        Box::pin(async move {
            let response = match rewritten.parse::<Uri>() {
                Ok(uri) => {
                    *request.uri_mut() = uri;
                    proxy.call(request).await?
                }
                Err(error) => {
                    let mut response = Response::new(Either::Right(format!(
                        "could not address canister '{}': {}",
                        binding.canister_id, error
                    )));
                    *response.status_mut() = StatusCode::BAD_REQUEST;
                    response
                }
            };

            AccessEntry {
                canister_id: &binding.canister_id,
                port: binding.port,
                method: &method,
                original: &original,
                rewritten: &rewritten,
                forwarded: &forwarded,
                status: response.status(),
            }
            .log();

            Ok(response)
        })
    }
}

/// Owns the listener for one binding.
pub struct PortRouter {
    service: CanisterService,
}

impl PortRouter {
    pub fn new(binding: Binding, replica_host: &str) -> Self {
        Self {
            service: CanisterService::new(binding, replica_host),
        }
    }

    pub fn binding(&self) -> &Binding {
        self.service.binding()
    }

    /// Binds `127.0.0.1:<port>`.
    pub async fn bind(self) -> Result<ListeningRouter, RouterError> {
        let port = self.binding().port;

        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => Ok(self.listen_on(listener)),
            Err(source) => Err(RouterError::Bind {
                canister_id: self.binding().canister_id.clone(),
                port,
                source,
            }),
        }
    }

    /// Serves on a listener bound elsewhere. Log lines still carry the
    /// configured port.
    pub fn listen_on(self, listener: TcpListener) -> ListeningRouter {
        ListeningRouter {
            service: self.service,
            listener,
        }
    }
}

pub struct ListeningRouter {
    service: CanisterService,
    listener: TcpListener,
}

impl ListeningRouter {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the process ends.
    pub async fn serve(self) -> Result<(), RouterError> {
        let binding = self.service.binding().clone();

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(
                "canister {} listening on http://{} -> {}",
                binding.canister_id,
                addr,
                self.service.proxy.upstream()
            );
        }

        let app = Router::new()
            .fallback_service(self.service)
            .layer(TraceLayer::new_for_http());

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|source| RouterError::Serve {
            canister_id: binding.canister_id,
            port: binding.port,
            source,
        })
    }
}
