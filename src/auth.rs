//! Request context resolved upstream of this service.
//!
//! Authentication and role checks happen before requests reach the sync API.
//! The gateway forwards the authenticated actor and the viewer's visibility
//! scope as headers; this module only parses them.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::status::ViewerScope;

pub const ACTOR_ID_HEADER: &str = "X-Actor-Id";
pub const VIEWER_SCOPE_HEADER: &str = "X-Viewer-Scope";

/// Actor that requested the operation, when the gateway supplied one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Actor(pub Option<Uuid>);

/// Visibility scope of the viewer (defaults to internal)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewer(pub ViewerScope);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| {
        validation_error(
            format!("Invalid {name} header"),
            serde_json::json!({ name: "Header must be valid UTF-8" }),
        )
    })?;
    let value = value.trim();
    Ok((!value.is_empty()).then_some(value))
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = header_str(&parts.headers, ACTOR_ID_HEADER)? else {
            return Ok(Actor(None));
        };

        raw.parse::<Uuid>().map(|id| Actor(Some(id))).map_err(|_| {
            validation_error(
                "Invalid actor id",
                serde_json::json!({ ACTOR_ID_HEADER: "Must be a valid UUID" }),
            )
        })
    }
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = header_str(&parts.headers, VIEWER_SCOPE_HEADER)? else {
            return Ok(Viewer::default());
        };

        raw.parse::<ViewerScope>().map(Viewer).map_err(|message| {
            validation_error(
                "Invalid viewer scope",
                serde_json::json!({ VIEWER_SCOPE_HEADER: message }),
            )
        })
    }
}

/// OpenAPI header parameter for X-Actor-Id
#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Header)]
pub struct ActorHeader {
    /// Authenticated actor (UUID) recorded as the job's requester
    #[serde(rename = "X-Actor-Id")]
    #[param(rename = "X-Actor-Id", value_type = Option<String>)]
    pub actor_id: Option<String>,
}

/// OpenAPI header parameter for X-Viewer-Scope
#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Header)]
pub struct ViewerHeader {
    /// `internal` (default) or `external`; external viewers get generic failure messages
    #[serde(rename = "X-Viewer-Scope")]
    #[param(rename = "X-Viewer-Scope", value_type = Option<String>)]
    pub viewer_scope: Option<String>,
}
