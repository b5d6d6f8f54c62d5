use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;
use crate::core::security::{self, Claims, Role};
use crate::core::state::AppState;
use crate::db::models::{CandidateIdentity, ExamSession};

/// Any caller holding a valid token.
pub(crate) struct CurrentPrincipal(pub(crate) Claims);

pub(crate) struct CurrentCandidate {
    pub(crate) subject: String,
    pub(crate) identity: CandidateIdentity,
}

pub(crate) struct CurrentStaff(pub(crate) String);

/// Bearer header first, then `?token=` for WebSocket clients that cannot set headers.
fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    if from_header.is_some() {
        return from_header;
    }

    parts.uri.query().and_then(|query| {
        query.split('&').find_map(|pair| pair.strip_prefix("token=").map(str::to_string))
    })
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let token =
            bearer_token(parts).ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let claims = security::verify_token(&token, app_state.settings())
            .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;

        Ok(CurrentPrincipal(claims))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentCandidate {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentPrincipal(claims) = CurrentPrincipal::from_request_parts(parts, state).await?;

        if claims.role != Role::Candidate {
            return Err(ApiError::Forbidden("Candidate access required"));
        }
        let identity =
            claims.identity.ok_or(ApiError::Unauthorized("Token carries no candidate identity"))?;

        Ok(CurrentCandidate { subject: claims.sub, identity })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentStaff {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentPrincipal(claims) = CurrentPrincipal::from_request_parts(parts, state).await?;

        if claims.role == Role::Staff {
            Ok(CurrentStaff(claims.sub))
        } else {
            Err(ApiError::Forbidden("Staff access required"))
        }
    }
}

pub(crate) fn require_owner(
    session: &ExamSession,
    candidate: &CandidateIdentity,
) -> Result<(), ApiError> {
    if session.candidate.key() == candidate.key() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Session belongs to another candidate"))
    }
}

/// Staff see every session; candidates only their own.
pub(crate) fn require_owner_or_staff(
    session: &ExamSession,
    claims: &Claims,
) -> Result<(), ApiError> {
    match (claims.role, &claims.identity) {
        (Role::Staff, _) => Ok(()),
        (Role::Candidate, Some(identity)) => require_owner(session, identity),
        (Role::Candidate, None) => Err(ApiError::Forbidden("Session belongs to another candidate")),
    }
}
