//! The bundled protocol engine.
//!
//! Serves IdP metadata, resolves SP-initiated and IDP-initiated logins down
//! to a relying party, an assertion consumer endpoint, a relay state and a
//! session, and reports that hand-off as JSON.  Assertion minting and
//! signing are left to an engine that wraps or replaces this one.

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use quick_xml::escape::escape;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::request::AuthnRequest;
use super::{EngineContext, EngineFuture, EngineRequest, ProtocolEngine};
use crate::config::Config;
use crate::errors::IdpError;
use crate::metrics::LOGINS_TOTAL;
use crate::models::{EntityDescriptor, IndexedEndpoint, Session, User};
use crate::registry::ServiceProviderLookup;
use crate::store::{StoreError, StoreExt};
use crate::xml::{pem_certificate_body, render_idp_metadata};

pub const SESSION_COOKIE: &str = "session";

/// Longest relay state accepted from a relying party.
const MAX_RELAY_STATE: usize = 1024;

/// What a signing engine needs to mint and deliver an assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Handoff {
    pub service_provider: String,
    pub assertion_consumer_service: String,
    pub binding: String,
    pub relay_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,
    pub session_id: String,
    pub name_id: String,
}

pub struct HandoffEngine {
    metadata_url: String,
    sso_url: String,
    certificate: Option<String>,
    session_max_age: Duration,
    secure_cookies: bool,
}

/// Outcome of looking for the caller's session.
enum SessionState {
    /// A session from the cookie.
    Existing(Session),
    /// A session created from submitted credentials; its cookie must be set.
    Created(Session),
    /// No usable session; the login form is shown with an optional notice.
    Missing(Option<&'static str>),
}

impl HandoffEngine {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let certificate = match &config.idp.certificate_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path)?;
                let body = pem_certificate_body(&pem)
                    .ok_or_else(|| anyhow::anyhow!("no certificate found in {path}"))?;
                Some(body)
            }
            None => None,
        };
        Ok(Self {
            metadata_url: config.server.metadata_url(),
            sso_url: config.server.sso_url(),
            certificate,
            session_max_age: Duration::seconds(config.idp.session_max_age as i64),
            secure_cookies: config.server.is_https(),
        })
    }

    fn metadata(&self) -> Response {
        let body = render_idp_metadata(&self.metadata_url, &self.sso_url, self.certificate.as_deref());
        (
            StatusCode::OK,
            [("content-type", "application/samlmetadata+xml")],
            body,
        )
            .into_response()
    }

    async fn sso(
        &self,
        ctx: EngineContext<'_>,
        providers: &dyn ServiceProviderLookup,
        req: &EngineRequest,
    ) -> Result<Response, IdpError> {
        let encoded = req
            .param("SAMLRequest")
            .ok_or_else(|| IdpError::bad_request("missing SAMLRequest"))?;
        let authn = if req.method == Method::GET {
            AuthnRequest::from_redirect(&encoded)
        } else {
            AuthnRequest::from_post(&encoded)
        }
        .map_err(|e| IdpError::bad_request(e.to_string()))?;
        let relay_state = req.param("RelayState").unwrap_or_default();
        if relay_state.len() > MAX_RELAY_STATE {
            return Err(IdpError::bad_request("RelayState exceeds 1024 bytes"));
        }

        let metadata = providers.service_provider(&authn.issuer).ok_or_else(|| {
            warn!(issuer = %authn.issuer, "AuthnRequest from unknown service provider");
            IdpError::not_found(&authn.issuer)
        })?;
        let endpoint = match &authn.assertion_consumer_service_url {
            Some(url) => metadata.assertion_consumer_service(url).ok_or_else(|| {
                IdpError::bad_request(
                    "assertion consumer service URL is not registered for this service provider",
                )
            })?,
            None => default_endpoint(&metadata)?,
        };

        let (session, created) = match self.resolve_session(ctx, req).await? {
            SessionState::Existing(session) => (session, false),
            SessionState::Created(session) => (session, true),
            SessionState::Missing(notice) => return Ok(self.login_form(req, notice)),
        };
        let handoff = self.describe(&session, &metadata, endpoint, relay_state, Some(authn.id));
        self.respond(&session, created, handoff)
    }

    async fn idp_initiated(
        &self,
        ctx: EngineContext<'_>,
        providers: &dyn ServiceProviderLookup,
        req: &EngineRequest,
        service_provider: &str,
        relay_state: String,
    ) -> Result<Response, IdpError> {
        let metadata = providers
            .service_provider(service_provider)
            .ok_or_else(|| IdpError::not_found(service_provider))?;
        let endpoint = default_endpoint(&metadata)?;

        let (session, created) = match self.resolve_session(ctx, req).await? {
            SessionState::Existing(session) => (session, false),
            SessionState::Created(session) => (session, true),
            SessionState::Missing(notice) => return Ok(self.login_form(req, notice)),
        };
        let handoff = self.describe(&session, &metadata, endpoint, relay_state, None);
        self.respond(&session, created, handoff)
    }

    async fn login(&self, ctx: EngineContext<'_>, req: &EngineRequest) -> Result<Response, IdpError> {
        Ok(match self.resolve_session(ctx, req).await? {
            SessionState::Existing(session) => Json(session).into_response(),
            SessionState::Created(session) => {
                let cookie = self.session_cookie(&session)?;
                ([(header::SET_COOKIE, cookie)], Json(session)).into_response()
            }
            SessionState::Missing(notice) => self.login_form(req, notice),
        })
    }

    /// Submitted credentials take precedence over an existing cookie.
    async fn resolve_session(
        &self,
        ctx: EngineContext<'_>,
        req: &EngineRequest,
    ) -> Result<SessionState, IdpError> {
        if req.method == Method::POST {
            let mut form = req.form();
            if let (Some(user_name), Some(password)) = (form.remove("user"), form.remove("password")) {
                return self.authenticate(ctx, &user_name, password).await;
            }
        }

        let Some(id) = req.cookie(SESSION_COOKIE) else {
            return Ok(SessionState::Missing(None));
        };
        match ctx.store.get_as::<Session>(&format!("/sessions/{id}")).await {
            Ok(session) if !session.is_expired(Utc::now()) => Ok(SessionState::Existing(session)),
            Ok(_) => {
                debug!(session = %id, "Session expired");
                Ok(SessionState::Missing(None))
            }
            Err(StoreError::NotFound(_)) => Ok(SessionState::Missing(None)),
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(
        &self,
        ctx: EngineContext<'_>,
        user_name: &str,
        password: String,
    ) -> Result<SessionState, IdpError> {
        const REJECTED: &str = "Invalid username or password";

        let user = match ctx.store.get_as::<User>(&format!("/users/{user_name}")).await {
            Ok(user) => user,
            Err(StoreError::NotFound(_)) => {
                metrics::counter!(LOGINS_TOTAL, "outcome" => "rejected").increment(1);
                info!(user = %user_name, "Login for unknown user");
                return Ok(SessionState::Missing(Some(REJECTED)));
            }
            Err(e) => return Err(e.into()),
        };
        if !ctx.credentials.verify(&user, password).await {
            metrics::counter!(LOGINS_TOTAL, "outcome" => "rejected").increment(1);
            info!(user = %user_name, "Login rejected");
            return Ok(SessionState::Missing(Some(REJECTED)));
        }

        let now = Utc::now();
        let session = Session {
            id: hex::encode(rand::random::<[u8; 32]>()),
            create_time: now,
            expire_time: now + self.session_max_age,
            index: uuid::Uuid::new_v4().simple().to_string(),
            name_id: user.email.clone(),
            user_name: user.name.clone(),
            groups: user.groups.iter().cloned().collect(),
            user_email: user.email,
            user_common_name: user.common_name,
            user_surname: user.surname,
            user_given_name: user.given_name,
            user_scoped_affiliation: user.scoped_affiliation,
        };
        ctx.store
            .put_as(&format!("/sessions/{}", session.id), &session)
            .await?;
        metrics::counter!(LOGINS_TOTAL, "outcome" => "accepted").increment(1);
        info!(user = %session.user_name, "Login accepted");
        Ok(SessionState::Created(session))
    }

    fn session_cookie(&self, session: &Session) -> Result<HeaderValue, IdpError> {
        let mut cookie = format!(
            "{SESSION_COOKIE}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            session.id,
            self.session_max_age.num_seconds()
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| IdpError::Internal(e.into()))
    }

    fn describe(
        &self,
        session: &Session,
        metadata: &EntityDescriptor,
        endpoint: &IndexedEndpoint,
        relay_state: String,
        in_response_to: Option<String>,
    ) -> Handoff {
        Handoff {
            service_provider: metadata.entity_id.clone(),
            assertion_consumer_service: endpoint.location.clone(),
            binding: endpoint.binding.clone(),
            relay_state,
            in_response_to,
            session_id: session.id.clone(),
            name_id: session.name_id.clone(),
        }
    }

    /// Report `handoff`, setting the cookie of a session created by this
    /// request.
    fn respond(&self, session: &Session, created: bool, handoff: Handoff) -> Result<Response, IdpError> {
        if created {
            let cookie = self.session_cookie(session)?;
            Ok(([(header::SET_COOKIE, cookie)], Json(handoff)).into_response())
        } else {
            Ok(Json(handoff).into_response())
        }
    }

    /// HTML login form posting back to the current path, carrying any
    /// `SAMLRequest` and `RelayState` through.
    fn login_form(&self, req: &EngineRequest, notice: Option<&str>) -> Response {
        let mut hidden = String::new();
        for name in ["SAMLRequest", "RelayState"] {
            if let Some(value) = req.param(name) {
                hidden.push_str(&format!(
                    "<input type=\"hidden\" name=\"{name}\" value=\"{}\" />\n",
                    escape(value.as_str())
                ));
            }
        }
        let notice = notice
            .map(|n| format!("<p class=\"notice\">{}</p>\n", escape(n)))
            .unwrap_or_default();
        let page = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Sign in</title></head>\n<body>\n{notice}\
             <form method=\"post\" action=\"{action}\">\n\
             <input type=\"text\" name=\"user\" placeholder=\"user\" />\n\
             <input type=\"password\" name=\"password\" placeholder=\"password\" />\n\
             {hidden}<input type=\"submit\" value=\"Log In\" />\n</form>\n</body>\n</html>\n",
            action = escape(req.uri.path()),
        );
        Html(page).into_response()
    }
}

fn default_endpoint(metadata: &EntityDescriptor) -> Result<&IndexedEndpoint, IdpError> {
    metadata.default_assertion_consumer_service().ok_or_else(|| {
        IdpError::bad_request("service provider has no assertion consumer service")
    })
}

impl ProtocolEngine for HandoffEngine {
    fn serve_metadata<'a>(&'a self, _ctx: EngineContext<'a>, _req: EngineRequest) -> EngineFuture<'a> {
        Box::pin(async move { self.metadata() })
    }

    fn serve_sso<'a>(
        &'a self,
        ctx: EngineContext<'a>,
        providers: &'a dyn ServiceProviderLookup,
        req: EngineRequest,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            self.sso(ctx, providers, &req)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        })
    }

    fn serve_idp_initiated<'a>(
        &'a self,
        ctx: EngineContext<'a>,
        providers: &'a dyn ServiceProviderLookup,
        req: EngineRequest,
        service_provider: String,
        relay_state: String,
    ) -> EngineFuture<'a> {
        Box::pin(async move {
            self.idp_initiated(ctx, providers, &req, &service_provider, relay_state)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        })
    }

    fn handle_login<'a>(&'a self, ctx: EngineContext<'a>, req: EngineRequest) -> EngineFuture<'a> {
        Box::pin(async move {
            self.login(ctx, &req)
                .await
                .unwrap_or_else(IntoResponse::into_response)
        })
    }
}
