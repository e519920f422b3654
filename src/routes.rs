use http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

pub fn create_routes(state: AppState, cors_allow_origin: Option<&HeaderValue>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/polls", get(handlers::list_polls).post(handlers::create_poll))
        .route(
            "/polls/{id}",
            get(handlers::get_poll)
                .put(handlers::update_poll)
                .delete(handlers::delete_poll),
        )
        .route("/polls/{id}/delete", post(handlers::delete_poll_and_redirect))
        .route("/polls/{id}/votes", post(handlers::submit_vote))
        .route("/polls/{id}/results", get(handlers::get_results))
        .route("/polls/{id}/results/stream", get(handlers::stream_results))
        .layer(cors(cors_allow_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors(allow_origin: Option<&HeaderValue>) -> CorsLayer {
    let origin = match allow_origin {
        Some(origin) => AllowOrigin::exact(origin.clone()),
        None => AllowOrigin::from(Any),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}
