//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /api/auth/login - Login and get tokens
//! - POST /api/auth/logout - Logout the current session
//! - POST /api/auth/logout-all - Logout every session of the caller
//! - POST /api/auth/refresh - Exchange a refresh token for a new pair
//! - POST /api/auth/validate - Check an access token
//! - GET /api/auth/me - Get current account info
//!
//! Protected handlers take the [`Authenticated`] extractor, which runs the
//! [`RequestAuthenticator`] pipeline before the handler body.

use std::net::{IpAddr, SocketAddr};

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRef, FromRequestParts, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::core::auth::{
    AuthError, AuthResponse, IdentityContext, LoginRequest, LogoutAllReceipt, LogoutReceipt,
    RefreshRequest, RequestAuthenticator, SessionManager, TokenPair, ValidationResult,
};
use crate::core::db::models::IdentitySummary;

/// Auth API state
#[derive(Clone)]
pub struct AuthApiState {
    pub sessions: SessionManager,
    pub authenticator: RequestAuthenticator,
}

impl FromRef<AuthApiState> for RequestAuthenticator {
    fn from_ref(state: &AuthApiState) -> Self {
        state.authenticator.clone()
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Convert AuthError to API response.
/// Every rejection looks the same from the outside.
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::RevokedToken => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("Unauthorized", "UNAUTHORIZED"),
            ),
            AuthError::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("Service temporarily unavailable", "SERVICE_UNAVAILABLE"),
            ),
            AuthError::InternalError(detail) => {
                tracing::error!(detail = %detail, "internal authentication error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("Internal server error", "INTERNAL_ERROR"),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

// ============================================================================
// Extractors
// ============================================================================

/// Peer address of the connection, when the server was started with connect info
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

/// Axum extractor for authenticated callers
///
/// Rejects with 401 unless the `Authorization` header carries a valid, unrevoked
/// access token of an active account.
#[derive(Debug, Clone)]
pub struct Authenticated(pub IdentityContext);

impl<S> FromRequestParts<S> for Authenticated
where
    RequestAuthenticator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = RequestAuthenticator::from_ref(state);
        let ClientIp(client_ip) = ClientIp::from_request_parts(parts, state)
            .await
            .unwrap_or(ClientIp(None));

        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let identity = authenticator.authenticate(authorization, client_ip).await?;
        Ok(Authenticated(identity))
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Response for token refresh
#[derive(Debug, Serialize)]
pub struct RefreshApiResponse {
    pub tokens: TokenPair,
}

/// Request to validate an access token
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
}

/// Response for logout
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
    pub complete: bool,
    #[serde(flatten)]
    pub receipt: LogoutReceipt,
}

/// Response for logout from every device
#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub message: String,
    pub complete: bool,
    #[serde(flatten)]
    pub receipt: LogoutAllReceipt,
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route("/api/auth/logout-all", post(logout_all_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/validate", post(validate_handler))
        .route("/api/auth/me", get(me_handler))
        .with_state(state)
}

/// POST /api/auth/login
/// Login and get access/refresh tokens
async fn login_handler(
    State(state): State<AuthApiState>,
    ClientIp(client_ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    tracing::debug!(ip = ?client_ip, "login attempt");

    let response = state.sessions.login(request, client_ip).await?;

    Ok(Json(response))
}

/// POST /api/auth/logout
/// Drop the caller's session and revoke its access token
async fn logout_handler(
    State(state): State<AuthApiState>,
    Authenticated(identity): Authenticated,
) -> Json<LogoutResponse> {
    let receipt = state.sessions.logout(&identity).await;
    let complete = receipt.is_complete();

    Json(LogoutResponse {
        message: if complete {
            "Logged out successfully".to_string()
        } else {
            "Logout could not be fully recorded".to_string()
        },
        complete,
        receipt,
    })
}

/// POST /api/auth/logout-all
/// Drop every session of the caller
async fn logout_all_handler(
    State(state): State<AuthApiState>,
    Authenticated(identity): Authenticated,
) -> Json<LogoutAllResponse> {
    let receipt = state.sessions.logout_all(&identity).await;
    let complete = receipt.is_complete();

    Json(LogoutAllResponse {
        message: if complete {
            "Logged out from all devices".to_string()
        } else {
            "Logout could not be fully recorded".to_string()
        },
        complete,
        receipt,
    })
}

/// POST /api/auth/refresh
/// Refresh access token using refresh token
async fn refresh_handler(
    State(state): State<AuthApiState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RefreshApiResponse>, AuthError> {
    tracing::debug!("token refresh request");

    let tokens = state.sessions.refresh(request).await?;

    Ok(Json(RefreshApiResponse { tokens }))
}

/// POST /api/auth/validate
async fn validate_handler(
    State(state): State<AuthApiState>,
    Json(request): Json<ValidateRequest>,
) -> Json<ValidationResult> {
    Json(state.authenticator.validate(&request.token).await)
}

/// GET /api/auth/me
/// Get current account info from access token
async fn me_handler(Authenticated(identity): Authenticated) -> Json<IdentitySummary> {
    Json(identity.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::StepOutcome;
    use crate::core::auth::testutil::{DOCTOR_EMAIL, DOCTOR_PASSWORD, Harness};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Response<Body>) {
        let response = router.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    // ========================================================================
    // Error Mapping Tests
    // ========================================================================

    #[test]
    fn test_api_error_serialization() {
        let error = ApiError::new("Something went wrong", "ERROR_CODE");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("Something went wrong"));
        assert!(json.contains("ERROR_CODE"));
    }

    #[tokio::test]
    async fn test_rejections_map_to_identical_responses() {
        let mut bodies = Vec::new();
        for err in [
            AuthError::InvalidCredentials,
            AuthError::InvalidToken,
            AuthError::RevokedToken,
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "Bearer"
            );
            bodies.push(body_json(response).await);
        }

        assert_eq!(bodies[0], json!({"error": "Unauthorized", "code": "UNAUTHORIZED"}));
        assert!(bodies.iter().all(|body| body == &bodies[0]));
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = AuthError::InternalError("signing key exploded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert!(!body.to_string().contains("signing key"));
    }

    #[test]
    fn test_store_unavailable_is_503() {
        let response = AuthError::StoreUnavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    // ========================================================================
    // Route Tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_route() {
        let harness = Harness::new().await;
        let router = auth_api_router(harness.api_state());

        let (status, response) = send(
            router,
            post_json(
                "/api/auth/login",
                json!({"email": DOCTOR_EMAIL, "password": DOCTOR_PASSWORD}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["account"]["role"], "doctor");
        assert_eq!(body["tokens"]["token_type"], "Bearer");
        assert!(body["account"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_login_route_wrong_password() {
        let harness = Harness::new().await;
        let router = auth_api_router(harness.api_state());

        let (status, response) = send(
            router,
            post_json(
                "/api/auth/login",
                json!({"email": DOCTOR_EMAIL, "password": "wrong"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_me_route_requires_bearer() {
        let harness = Harness::new().await;
        let router = auth_api_router(harness.api_state());

        let request = Request::get("/api/auth/me").body(Body::empty()).unwrap();
        let (status, _) = send(router, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_me_route_returns_identity() {
        let harness = Harness::new().await;
        let login = harness.login_doctor().await;
        let router = auth_api_router(harness.api_state());

        let (status, response) = send(
            router,
            with_bearer("GET", "/api/auth/me", &login.tokens.access_token),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["email"], DOCTOR_EMAIL);
        assert_eq!(body["id"], harness.doctor.id.to_string());
    }

    #[tokio::test]
    async fn test_refresh_token_cannot_call_me() {
        let harness = Harness::new().await;
        let login = harness.login_doctor().await;
        let router = auth_api_router(harness.api_state());

        let (status, _) = send(
            router,
            with_bearer("GET", "/api/auth/me", &login.tokens.refresh_token),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_route_then_validate() {
        let harness = Harness::new().await;
        let login = harness.login_doctor().await;
        let access = login.tokens.access_token.clone();

        let (status, response) = send(
            auth_api_router(harness.api_state()),
            with_bearer("POST", "/api/auth/logout", &access),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["complete"], true);
        assert_eq!(body["session"], "done");
        assert_eq!(body["revocation"], "done");

        let (status, response) = send(
            auth_api_router(harness.api_state()),
            post_json("/api/auth/validate", json!({"token": access})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"valid": false}));

        let (status, _) = send(
            auth_api_router(harness.api_state()),
            with_bearer("POST", "/api/auth/logout", &access),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_route() {
        let harness = Harness::new().await;
        let login = harness.login_doctor().await;

        let (status, response) = send(
            auth_api_router(harness.api_state()),
            post_json(
                "/api/auth/refresh",
                json!({"refresh_token": login.tokens.refresh_token}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body_json(response).await;
        assert_ne!(body["tokens"]["refresh_token"], json!(login.tokens.refresh_token));

        let (status, _) = send(
            auth_api_router(harness.api_state()),
            post_json(
                "/api/auth/refresh",
                json!({"refresh_token": login.tokens.refresh_token}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_all_route() {
        let harness = Harness::new().await;
        let first = harness.login_doctor().await;
        let second = harness.login_doctor().await;

        let (status, response) = send(
            auth_api_router(harness.api_state()),
            with_bearer("POST", "/api/auth/logout-all", &first.tokens.access_token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["sessions_removed"], 2);
        assert_eq!(body["complete"], true);

        let result = harness
            .authenticator
            .validate(&second.tokens.access_token)
            .await;
        assert!(!result.valid);
    }

    #[test]
    fn test_logout_response_serialization() {
        let response = LogoutResponse {
            message: "Logged out successfully".to_string(),
            complete: true,
            receipt: LogoutReceipt {
                session: StepOutcome::Done,
                revocation: StepOutcome::Done,
            },
        };
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["message"], "Logged out successfully");
        assert_eq!(json["session"], "done");
    }
}
