//! Protocol engine seam.
//!
//! The SAML protocol work (metadata, SSO, IDP-initiated responses, login)
//! sits behind [`ProtocolEngine`].  The server calls it with the store, the
//! credential manager and, where a relying party has to be resolved, a
//! [`ServiceProviderLookup`] backed by the registry's shared lock.
//!
//! [`HandoffEngine`] is the bundled implementation.  It resolves everything
//! an assertion needs and reports the result as JSON; a signing engine
//! plugs in through the same trait.

mod handoff;
mod request;

pub use handoff::{Handoff, HandoffEngine};
pub use request::{AuthnRequest, RequestError};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::Response;
use bytes::Bytes;

use crate::credentials::CredentialManager;
use crate::registry::ServiceProviderLookup;
use crate::store::Store;

/// Boxed future returned by engine entry points.  Engines report failures
/// as responses themselves.
pub type EngineFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Collaborators an engine may use while serving one request.
#[derive(Clone, Copy)]
pub struct EngineContext<'a> {
    pub store: &'a dyn Store,
    pub credentials: &'a CredentialManager,
}

pub trait ProtocolEngine: Send + Sync + 'static {
    /// Serve the IdP's metadata document.
    fn serve_metadata<'a>(&'a self, ctx: EngineContext<'a>, req: EngineRequest) -> EngineFuture<'a>;

    /// Serve an SP-initiated `AuthnRequest`.
    fn serve_sso<'a>(
        &'a self,
        ctx: EngineContext<'a>,
        providers: &'a dyn ServiceProviderLookup,
        req: EngineRequest,
    ) -> EngineFuture<'a>;

    /// Start an unsolicited login at `service_provider` carrying
    /// `relay_state`.
    fn serve_idp_initiated<'a>(
        &'a self,
        ctx: EngineContext<'a>,
        providers: &'a dyn ServiceProviderLookup,
        req: EngineRequest,
        service_provider: String,
        relay_state: String,
    ) -> EngineFuture<'a>;

    /// Establish or report the caller's session.
    fn handle_login<'a>(&'a self, ctx: EngineContext<'a>, req: EngineRequest) -> EngineFuture<'a>;
}

/// The parts of an HTTP request an engine reads.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl EngineRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
        }
    }

    pub fn query(&self) -> HashMap<String, String> {
        parse_urlencoded(self.uri.query().unwrap_or(""))
    }

    /// Fields of an `application/x-www-form-urlencoded` body; empty for any
    /// other content type.
    pub fn form(&self) -> HashMap<String, String> {
        let is_form = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return HashMap::new();
        }
        parse_urlencoded(&String::from_utf8_lossy(&self.body))
    }

    /// A form field, falling back to the query string.
    pub fn param(&self, name: &str) -> Option<String> {
        self.form()
            .remove(name)
            .or_else(|| self.query().remove(name))
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }
}

/// Parse `application/x-www-form-urlencoded` text.  Later duplicates win.
pub fn parse_urlencoded(raw: &str) -> HashMap<String, String> {
    let decode = |s: &str| {
        percent_encoding::percent_decode_str(&s.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned()
    };
    let mut map = HashMap::new();
    for part in raw.split('&').filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((k, v)) => map.insert(decode(k), decode(v)),
            None => map.insert(decode(part), String::new()),
        };
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(method: Method, uri: &str, headers: &[(&'static str, &str)], body: &str) -> EngineRequest {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(*k, HeaderValue::from_str(v).unwrap());
        }
        EngineRequest::new(method, uri.parse().unwrap(), map, Bytes::from(body.to_string()))
    }

    #[test]
    fn test_parse_urlencoded() {
        let map = parse_urlencoded("a=1&b=hello+world&c=%2Fx%3D&flag");
        assert_eq!(map["a"], "1");
        assert_eq!(map["b"], "hello world");
        assert_eq!(map["c"], "/x=");
        assert_eq!(map["flag"], "");
    }

    #[test]
    fn test_param_prefers_form_over_query() {
        let req = request(
            Method::POST,
            "/sso?RelayState=from-query&SAMLRequest=q",
            &[("content-type", "application/x-www-form-urlencoded")],
            "RelayState=from-form",
        );
        assert_eq!(req.param("RelayState").as_deref(), Some("from-form"));
        assert_eq!(req.param("SAMLRequest").as_deref(), Some("q"));
        assert_eq!(req.param("missing"), None);
    }

    #[test]
    fn test_form_ignored_for_other_content_types() {
        let req = request(
            Method::POST,
            "/login",
            &[("content-type", "application/json")],
            "user=alice",
        );
        assert!(req.form().is_empty());
    }

    #[test]
    fn test_cookie_lookup() {
        let req = request(
            Method::GET,
            "/login",
            &[("cookie", "theme=dark; session=abc123"), ("cookie", "other=1")],
            "",
        );
        assert_eq!(req.cookie("session").as_deref(), Some("abc123"));
        assert_eq!(req.cookie("other").as_deref(), Some("1"));
        assert_eq!(req.cookie("missing"), None);
    }
}
