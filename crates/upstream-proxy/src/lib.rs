mod forward;

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::future::BoxFuture;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::Either;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{
        connect::{Connect, HttpConnector},
        Client,
    },
    rt::TokioExecutor,
};
use tower::Service;

pub use forward::{forward_url, HyperReverseProxy, ProxyError};

/// Address of the peer that sent a request.
///
/// Insert it into the request extensions to have it reported upstream in
/// `X-Forwarded-For`; requests without it are reported as coming from
/// localhost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Forwards every request it is called with to `upstream`, keeping the
/// request target.
pub struct ReverseProxyService<C, Body> {
    upstream: Arc<str>,
    proxy: HyperReverseProxy<C, Body>,
}

pub type HttpReverseProxyService<Body> = ReverseProxyService<HttpConnector, Body>;

impl<C, B> ReverseProxyService<C, B> {
    pub fn new(upstream: impl Into<Arc<str>>, client: Client<C, B>) -> ReverseProxyService<C, B> {
        Self {
            upstream: upstream.into(),
            proxy: HyperReverseProxy::new(client),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

impl<B> ReverseProxyService<HttpConnector, B> {
    pub fn new_http(upstream: impl Into<Arc<str>>) -> ReverseProxyService<HttpConnector, B>
    where
        B: HttpBody + Send,
        B::Data: Send,
    {
        Self::new(
            upstream,
            Client::builder(TokioExecutor::new())
                .pool_idle_timeout(Duration::from_secs(30))
                .build_http(),
        )
    }
}

impl<C: Clone, B> Clone for ReverseProxyService<C, B> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

pub type ProxyBody = Either<Incoming, String>;

fn text_response(status: StatusCode, text: String) -> Response<ProxyBody> {
    let mut response = Response::new(Either::Right(text));
    *response.status_mut() = status;
    response
}

impl<C, Body> Service<Request<Body>> for ReverseProxyService<C, Body>
where
    C: Connect + Clone + Send + Sync + 'static,
    Body: HttpBody + Send + 'static + Unpin,
    Body::Data: Send,
    Body::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<ProxyBody>;
    type Error = std::convert::Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let upstream = self.upstream.clone();
        let proxy = self.proxy.clone();
        let client_ip = request
            .extensions()
            .get::<ClientAddr>()
            .map(|addr| addr.0)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        Box::pin(async move {
            let res = match proxy.call(client_ip, &upstream, request).await {
                Ok(res) => res.map(Either::Left),
                Err(ProxyError::HyperClientError(error)) if error.is_connect() => text_response(
                    StatusCode::BAD_GATEWAY,
                    format!("Bad gateway. Is the replica running at {upstream}?"),
                ),
                Err(error) => {
                    tracing::warn!("proxying to {} failed: {}", upstream, error);
                    text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
                }
            };

            Ok(res)
        })
    }
}
