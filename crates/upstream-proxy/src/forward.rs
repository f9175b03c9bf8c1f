use std::net::IpAddr;
use std::sync::LazyLock;

use http::header::{InvalidHeaderValue, ToStrError, HOST};
use http::uri::InvalidUri;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::Error as HyperError;
use hyper_util::client::legacy::{connect::Connect, Client, Error as HyperClientError};
use hyper_util::rt::TokioIo;
use tokio::io::copy_bidirectional;
use tracing::*;

static TE_HEADER: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("te"));
static CONNECTION_HEADER: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("connection"));
static UPGRADE_HEADER: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("upgrade"));
static TRAILER_HEADER: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("trailer"));

// Compared with HeaderName equality, so casing on the wire does not matter.
static HOP_HEADERS: LazyLock<[HeaderName; 9]> = LazyLock::new(|| {
    [
        CONNECTION_HEADER.clone(),
        TE_HEADER.clone(),
        TRAILER_HEADER.clone(),
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("transfer-encoding"),
        UPGRADE_HEADER.clone(),
    ]
});

static X_FORWARDED_FOR: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("x-forwarded-for"));

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid forward uri: {0}")]
    InvalidUri(#[from] InvalidUri),
    #[error("hyper error: {0}")]
    HyperError(#[from] HyperError),
    #[error("upstream request failed: {0}")]
    HyperClientError(#[from] HyperClientError),
    #[error("could not forward request headers")]
    ForwardHeaderError,
    #[error("upgrade failed: {0}")]
    UpgradeError(String),
}

impl From<ToStrError> for ProxyError {
    fn from(_err: ToStrError) -> ProxyError {
        ProxyError::ForwardHeaderError
    }
}

impl From<InvalidHeaderValue> for ProxyError {
    fn from(_err: InvalidHeaderValue) -> ProxyError {
        ProxyError::ForwardHeaderError
    }
}

pub struct HyperReverseProxy<T, ReqBody> {
    client: Client<T, ReqBody>,
}

impl<C: Clone, B> Clone for HyperReverseProxy<C, B> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T, ReqBody> HyperReverseProxy<T, ReqBody> {
    pub fn new(client: Client<T, ReqBody>) -> Self {
        Self { client }
    }

    pub async fn call(
        &self,
        client_ip: IpAddr,
        upstream: &str,
        request: Request<ReqBody>,
    ) -> Result<Response<Incoming>, ProxyError>
    where
        T: Connect + Clone + Send + Sync + 'static,
        ReqBody: HttpBody + Send + Unpin + 'static,
        ReqBody::Data: Send,
        ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        call::<T, ReqBody>(client_ip, upstream, request, &self.client).await
    }
}

fn remove_hop_headers(headers: &mut HeaderMap) {
    debug!("Removing hop headers");

    for header in &*HOP_HEADERS {
        headers.remove(header);
    }
}

/// Lists the comma separated values of a header, or nothing when it is absent
/// or not visible ascii.
fn header_tokens(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
        .collect()
}

fn get_upgrade_type(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = header_tokens(headers, &CONNECTION_HEADER)
        .iter()
        .any(|token| token.eq_ignore_ascii_case(UPGRADE_HEADER.as_str()));

    if !wants_upgrade {
        return None;
    }

    let upgrade_value = headers.get(&*UPGRADE_HEADER)?;
    debug!("Found upgrade header with value: {:?}", upgrade_value);

    Some(upgrade_value.clone())
}

fn remove_connection_headers(headers: &mut HeaderMap) {
    let names = header_tokens(headers, &CONNECTION_HEADER);

    if !names.is_empty() {
        debug!("Removing connection headers");
    }

    for name in names {
        headers.remove(name.as_str());
    }
}

fn create_proxied_response<B>(mut response: Response<B>) -> Response<B> {
    // Connection lists extra hop headers, so it has to be read before it goes.
    remove_connection_headers(response.headers_mut());
    remove_hop_headers(response.headers_mut());

    response
}

/// Joins `upstream` and a request target (`/path?query`) into the url the
/// request is forwarded to.
///
/// A trailing `/` on the upstream is dropped. Query parameters carried by the
/// upstream itself come before the ones from the request target.
pub fn forward_url(upstream: &str, path_and_query: &str) -> String {
    let (mut base_url, upstream_query) = upstream.split_once('?').unwrap_or((upstream, ""));
    let (path, request_query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));

    if let Some(trimmed) = base_url.strip_suffix('/') {
        base_url = trimmed;
    }

    let mut url = String::with_capacity(
        base_url.len() + path.len() + upstream_query.len() + request_query.len() + 2,
    );

    url.push_str(base_url);
    url.push_str(path);

    if !upstream_query.is_empty() || !request_query.is_empty() {
        url.push('?');
        url.push_str(upstream_query);

        if !upstream_query.is_empty() && !request_query.is_empty() {
            url.push('&');
        }

        url.push_str(request_query);
    }

    debug!("Built forwarding url from request: {}", url);

    url
}

fn create_proxied_request<B>(
    client_ip: IpAddr,
    upstream: &str,
    mut request: Request<B>,
    upgrade_type: Option<&HeaderValue>,
) -> Result<Request<B>, ProxyError> {
    let contains_te_trailers_value = header_tokens(request.headers(), &TE_HEADER)
        .iter()
        .any(|token| token.eq_ignore_ascii_case("trailers"));

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|target| target.as_str())
        .unwrap_or("/");
    let uri: hyper::Uri = forward_url(upstream, path_and_query).parse()?;

    // The client fills in the upstream host itself.
    request.headers_mut().remove(HOST);

    *request.uri_mut() = uri;

    remove_connection_headers(request.headers_mut());
    remove_hop_headers(request.headers_mut());

    if contains_te_trailers_value {
        request
            .headers_mut()
            .insert(&*TE_HEADER, HeaderValue::from_static("trailers"));
    }

    if let Some(value) = upgrade_type {
        debug!("Repopulate upgrade headers");

        request
            .headers_mut()
            .insert(&*UPGRADE_HEADER, value.clone());
        request
            .headers_mut()
            .insert(&*CONNECTION_HEADER, HeaderValue::from_static("UPGRADE"));
    }

    let client_ip = client_ip.to_string();
    let forwarded_for = match request.headers().get(&*X_FORWARDED_FOR) {
        Some(existing) => format!("{}, {}", existing.to_str()?, client_ip),
        None => client_ip,
    };
    request
        .headers_mut()
        .insert(&*X_FORWARDED_FOR, HeaderValue::from_str(&forwarded_for)?);

    Ok(request)
}

pub async fn call<T, ReqBody>(
    client_ip: IpAddr,
    upstream: &str,
    mut request: Request<ReqBody>,
    client: &Client<T, ReqBody>,
) -> Result<Response<Incoming>, ProxyError>
where
    T: Connect + Clone + Send + Sync + 'static,
    ReqBody: HttpBody + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    debug!(
        "Received proxy call from {} to {}, client: {}",
        request.uri(),
        upstream,
        client_ip
    );

    let request_upgrade_type = get_upgrade_type(request.headers());
    let request_upgraded = request.extensions_mut().remove::<OnUpgrade>();

    let proxied_request =
        create_proxied_request(client_ip, upstream, request, request_upgrade_type.as_ref())?;

    let mut response = client.request(proxied_request).await?;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(create_proxied_response(response));
    }

    let response_upgrade_type = get_upgrade_type(response.headers());

    if request_upgrade_type != response_upgrade_type {
        return Err(ProxyError::UpgradeError(format!(
            "upstream tried to switch to protocol {:?} when {:?} was requested",
            response_upgrade_type, request_upgrade_type
        )));
    }

    let Some(request_upgraded) = request_upgraded else {
        return Err(ProxyError::UpgradeError(
            "request does not have an upgrade extension".to_string(),
        ));
    };

    let Some(response_upgraded) = response.extensions_mut().remove::<OnUpgrade>() else {
        return Err(ProxyError::UpgradeError(
            "response does not have an upgrade extension".to_string(),
        ));
    };
    let response_upgraded = response_upgraded.await?;

    debug!("Relaying upgraded connection");

    tokio::spawn(async move {
        let request_upgraded = match request_upgraded.await {
            Ok(upgraded) => upgraded,
            Err(error) => {
                warn!("failed to upgrade client connection: {}", error);
                return;
            }
        };

        let mut response_upgraded = TokioIo::new(response_upgraded);
        let mut request_upgraded = TokioIo::new(request_upgraded);

        if let Err(error) = copy_bidirectional(&mut response_upgraded, &mut request_upgraded).await
        {
            debug!("upgraded connection closed: {}", error);
        }
    });

    Ok(response)
}
