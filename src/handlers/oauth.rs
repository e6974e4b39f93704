//! # OAuth Flow Handlers
//!
//! The authorization entry point and callback. Both are public routes: the
//! flow is protected by the signed correlation token rather than the service
//! credential, since the redirect arrives from the user's browser.

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ErrorCode, validation_error};
use crate::server::AppState;

/// Query parameters for starting an authorization flow
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthStartQuery {
    /// Website tenant to authorize
    pub website_id: Option<String>,
}

/// Query parameters Google sends to the callback
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthCallbackQuery {
    /// Authorization code to exchange
    pub code: Option<String>,
    /// Correlation token issued at flow start
    pub state: Option<String>,
    /// Error indicator, e.g. `access_denied`
    pub error: Option<String>,
}

/// Response returned when no post-grant redirect is configured
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GrantCompletedResponse {
    pub connected: bool,
    pub website_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_user_email: Option<String>,
}

/// Start the OAuth flow for a website
///
/// Redirects the browser to the Google consent screen with the fixed minimal
/// scope set and a short-lived signed state token binding the flow to the
/// website.
#[utoipa::path(
    get,
    path = "/auth/start",
    params(AuthStartQuery),
    responses(
        (status = 307, description = "Redirect to the Google consent screen"),
        (status = 400, description = "Missing website_id", body = ApiError),
        (status = 500, description = "OAuth is not configured", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn auth_start(
    State(state): State<AppState>,
    Query(query): Query<AuthStartQuery>,
) -> Result<Redirect, ApiError> {
    let website_id = query.website_id.unwrap_or_default();
    let url = state.grants.begin_authorization(&website_id)?;
    Ok(Redirect::temporary(url.as_str()))
}

/// Complete the OAuth flow
///
/// Verifies the state token, exchanges the code for tokens, and persists the
/// connection. Redirects to the configured post-grant URL when one is set,
/// otherwise returns JSON.
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(AuthCallbackQuery),
    responses(
        (status = 200, description = "Grant completed", body = GrantCompletedResponse),
        (status = 307, description = "Redirect to the post-grant URL"),
        (status = 400, description = "Missing or invalid parameters", body = ApiError),
        (status = 502, description = "Code exchange failed", body = ApiError)
    ),
    tag = "oauth"
)]
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(query): Query<AuthCallbackQuery>,
) -> Result<Response, ApiError> {
    if let Some(error) = query.error {
        tracing::warn!(error = %error, "Authorization denied at the consent screen");
        return Err(ErrorCode::TokenExchangeFailed
            .with_message(format!("Authorization was not granted: {}", error)));
    }

    let code = query.code.filter(|c| !c.is_empty()).ok_or_else(|| {
        validation_error(
            "Missing authorization code",
            serde_json::json!({ "code": "Required parameter is missing" }),
        )
    })?;
    let correlation_token = query.state.filter(|s| !s.is_empty()).ok_or_else(|| {
        validation_error(
            "Missing state token",
            serde_json::json!({ "state": "Required parameter is missing" }),
        )
    })?;

    let connection = state
        .grants
        .complete_authorization(&code, &correlation_token)
        .await?;

    if let Some(redirect_base) = state.config.post_grant_redirect.as_deref() {
        let target = build_post_grant_redirect(redirect_base, &connection.website_id)?;
        return Ok(Redirect::temporary(target.as_str()).into_response());
    }

    Ok(Json(GrantCompletedResponse {
        connected: true,
        website_id: connection.website_id,
        google_user_email: connection.google_user_email,
    })
    .into_response())
}

fn build_post_grant_redirect(base: &str, website_id: &str) -> Result<Url, ApiError> {
    let mut url = Url::parse(base).map_err(|e| {
        ErrorCode::InternalServerError
            .with_message(format!("Invalid post-grant redirect configured: {}", e))
    })?;
    url.query_pairs_mut()
        .append_pair("website_id", website_id)
        .append_pair("connected", "true");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_grant_redirect_carries_website_id() {
        let url = build_post_grant_redirect("https://app.example.com/settings", "site-9")
            .expect("valid redirect");

        assert_eq!(url.host_str(), Some("app.example.com"));
        assert!(url.query().unwrap().contains("website_id=site-9"));
        assert!(url.query().unwrap().contains("connected=true"));
    }

    #[test]
    fn invalid_redirect_base_is_a_server_error() {
        let error = build_post_grant_redirect("not a url", "site-9").unwrap_err();
        assert_eq!(error.code.as_ref(), "INTERNAL_SERVER_ERROR");
    }
}
