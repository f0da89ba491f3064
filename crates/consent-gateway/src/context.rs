use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Form, Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts},
};
use consent_core::DecisionSource;
use consent_platform::DecisionRequest;
use uuid::Uuid;

/// Per-request facts handed explicitly to handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn source(&self) -> DecisionSource {
        DecisionSource {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let request_id =
            header_value("x-request-id").unwrap_or_else(|| Uuid::new_v4().to_string());
        let forwarded = header_value("x-forwarded-for").and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find(|hop| !hop.is_empty())
                .map(str::to_string)
        });
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let user_agent = header_value(header::USER_AGENT.as_str());

        Ok(Self {
            request_id,
            ip: forwarded.or(peer),
            user_agent,
        })
    }
}

/// Decision body accepted as JSON or as an urlencoded form. An unreadable
/// body yields an empty request, which the handler answers as `invalid`.
#[derive(Debug, Clone, Default)]
pub struct DecisionPayload(pub DecisionRequest);

impl<S> FromRequest<S> for DecisionPayload
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().starts_with("application/json"));

        let request = if is_json {
            Json::<DecisionRequest>::from_request(req, state)
                .await
                .map(|Json(body)| body)
                .unwrap_or_default()
        } else {
            Form::<DecisionRequest>::from_request(req, state)
                .await
                .map(|Form(body)| body)
                .unwrap_or_default()
        };

        Ok(Self(request))
    }
}

impl DecisionPayload {
    pub fn token(&self) -> Option<&str> {
        self.0
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}
