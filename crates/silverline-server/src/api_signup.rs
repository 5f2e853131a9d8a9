//! `POST /api/signups`: family pre-registration of a senior.

use crate::api::{ApiError, FieldError};
use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use silverline_identity::{create_pending_signup, normalize_phone, IdentityError, NewSignup};
use silverline_types::{SignupStatus, SubscriptionTier};
use std::sync::Arc;

/// Request body for a family signup.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    pub senior_name: String,
    pub senior_phone: String,
    pub senior_email: Option<String>,
    pub family_name: String,
    pub family_email: String,
    pub family_phone: Option<String>,
    pub relationship: Option<String>,
    pub selected_tier: Option<String>,
    pub address_street: Option<String>,
    pub address_city: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
}

/// Response body for a created signup.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub signup_id: i64,
    pub signup_token: String,
    pub status: SignupStatus,
    pub tier: SubscriptionTier,
    pub expires_at: String,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_length(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) {
    let len = value.chars().count();
    if len < min || len > max {
        errors.push(FieldError::new(
            field,
            format!("must be {min} to {max} characters"),
        ));
    }
}

/// Accepts `local@domain.tld` with no whitespace.
fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
        && value.len() <= 255
}

/// Checks every field and returns the insert input, or the full list of
/// problems.
pub fn validate_signup(request: SignupRequest) -> Result<NewSignup, Vec<FieldError>> {
    let mut errors = Vec::new();

    let senior_name = request.senior_name.trim().to_string();
    check_length(&mut errors, "seniorName", &senior_name, 2, 255);
    let family_name = request.family_name.trim().to_string();
    check_length(&mut errors, "familyName", &family_name, 2, 255);

    let senior_phone = normalize_phone(&request.senior_phone).unwrap_or_else(|| {
        errors.push(FieldError::new("seniorPhone", "must be a valid phone number"));
        String::new()
    });

    let family_phone = match trimmed(request.family_phone) {
        Some(raw) => match normalize_phone(&raw) {
            Some(phone) => Some(phone),
            None => {
                errors.push(FieldError::new("familyPhone", "must be a valid phone number"));
                None
            }
        },
        None => None,
    };

    let family_email = request.family_email.trim().to_string();
    if !looks_like_email(&family_email) {
        errors.push(FieldError::new("familyEmail", "must be a valid email address"));
    }
    let senior_email = trimmed(request.senior_email);
    if let Some(email) = &senior_email {
        if !looks_like_email(email) {
            errors.push(FieldError::new("seniorEmail", "must be a valid email address"));
        }
    }

    let tier = match trimmed(request.selected_tier) {
        Some(raw) => match raw.to_lowercase().parse::<SubscriptionTier>() {
            Ok(tier) => Some(tier),
            Err(_) => {
                errors.push(FieldError::new("selectedTier", "must be basic, premium or family"));
                None
            }
        },
        None => None,
    };

    let relationship = trimmed(request.relationship);
    if let Some(value) = &relationship {
        check_length(&mut errors, "relationship", value, 0, 100);
    }
    let address_street = trimmed(request.address_street);
    if let Some(value) = &address_street {
        check_length(&mut errors, "addressStreet", value, 0, 255);
    }
    let address_city = trimmed(request.address_city);
    if let Some(value) = &address_city {
        check_length(&mut errors, "addressCity", value, 0, 100);
    }
    let address_state = trimmed(request.address_state);
    if let Some(value) = &address_state {
        check_length(&mut errors, "addressState", value, 0, 50);
    }
    let address_zip = trimmed(request.address_zip);
    if let Some(value) = &address_zip {
        check_length(&mut errors, "addressZip", value, 0, 20);
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(NewSignup {
        senior_name,
        senior_phone,
        senior_email,
        address_street,
        address_city,
        address_state,
        address_zip,
        family_name,
        family_email,
        family_phone,
        relationship,
        tier,
    })
}

/// Handler for `POST /api/signups`.
pub async fn create_signup_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let signup = validate_signup(payload).map_err(ApiError::Validation)?;
    let ttl_days = state.signup_ttl_days;
    let pool = state.pool.clone();

    let stored = tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| ApiError::InternalServerError(e.to_string()))?;
        create_pending_signup(&mut conn, &signup, ttl_days).map_err(|e| match e {
            IdentityError::DuplicateIdentity { existing } => ApiError::Conflict {
                message: "phone number already registered".to_string(),
                status: existing,
            },
            other => ApiError::InternalServerError(other.to_string()),
        })
    })
    .await
    .map_err(|e| ApiError::InternalServerError(e.to_string()))??;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            signup_id: stored.id,
            signup_token: stored.signup_token,
            status: stored.status,
            tier: stored.tier,
            expires_at: stored.expires_at,
        }),
    ))
}
