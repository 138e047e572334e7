use std::time::Duration;

use axum::{
    Json, Router,
    http::{
        HeaderValue, Method, Response, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, OnResponse, TraceLayer};
use tracing::{Level, Span, error, info, warn};

use notehive_types::api::MessageResponse;

use crate::config::Config;
use crate::error::{error_responder, panic_response};
use crate::middleware::{optional_auth, require_auth};
use crate::state::AppState;
use crate::{auth, notes, oauth, password_reset};

/// The full HTTP surface with its middleware stack.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/auth/google", get(oauth::google_start))
        .route("/auth/google/callback", get(oauth::google_callback))
        .route("/password-reset/forgot", post(password_reset::forgot_password))
        .route("/password-reset/verify-otp", post(password_reset::verify_otp))
        .route("/password-reset/reset", post(password_reset::reset_password))
        .route("/test", get(welcome));

    let session_routes = Router::new()
        .route("/", post(auth::verify_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), optional_auth));

    let note_routes = Router::new()
        .route("/api/notes", get(notes::list_notes).post(notes::create_note))
        .route("/api/notes/stats", get(notes::note_stats))
        .route(
            "/api/notes/{id}",
            get(notes::get_note)
                .put(notes::update_note)
                .delete(notes::delete_note),
        )
        .route("/api/notes/{id}/star", patch(notes::toggle_star))
        .route("/api/notes/{id}/archive", patch(notes::toggle_archive))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(public_routes)
        .merge(session_routes)
        .merge(note_routes)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), error_responder))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(StatusLevel),
        )
        .layer(cors)
        .with_state(state)
}

/// Exact client origin in production; any origin is mirrored in development.
fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.is_production() {
        match HeaderValue::from_str(&config.client_url) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => AllowOrigin::list(Vec::<HeaderValue>::new()),
        }
    } else {
        AllowOrigin::mirror_request()
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

/// Access log line whose level follows the response status.
#[derive(Debug, Clone, Copy)]
struct StatusLevel;

impl<B> OnResponse<B> for StatusLevel {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status();
        let latency_ms = latency.as_millis() as u64;
        if status.is_server_error() {
            error!(%status, latency_ms, "request completed");
        } else if status.is_client_error() {
            warn!(%status, latency_ms, "request completed");
        } else {
            info!(%status, latency_ms, "request completed");
        }
    }
}

async fn welcome() -> &'static str {
    "Welcome to the backend server"
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(MessageResponse::failure("Route not found")),
    )
}
