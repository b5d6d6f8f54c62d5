use validator::Validate;

use crate::api::errors::ApiError;

pub(crate) fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Violation kinds are free-form on the wire but must look like identifiers.
pub(crate) fn validate_violation_kind(kind: &str) -> Result<(), ApiError> {
    let valid = !kind.trim().is_empty()
        && kind.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest("Invalid violation kind".to_string()))
    }
}
