//! Consumer-facing HTTP surface. Planning and authorization failures are
//! GraphQL errors in a 200 body; non-200 statuses are reserved for
//! transport-level problems such as unparseable request bodies.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use serde_json::json;

use opendx_federation::GraphQLRequest;
use opendx_federation::GraphQLResponse;

use crate::configuration::Profile;
use crate::gateway::ConsumerIdentity;
use crate::gateway::Gateway;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", post(graphql))
        .route("/health", get(health))
        .route("/public/sdl", get(public_sdl))
        .with_state(gateway)
}

async fn graphql(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(request): Json<GraphQLRequest>,
) -> Json<GraphQLResponse> {
    let consumer = consumer_identity(&gateway, &headers);
    Json(gateway.handle(request, &consumer).await)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"message": "gateway is up and running"}))
}

async fn public_sdl(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    match gateway.active_sdl() {
        Ok(sdl) => (StatusCode::OK, Json(json!({"sdl": sdl}))),
        Err(error) => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": error.to_string()})),
        ),
    }
}

fn consumer_identity(gateway: &Gateway, headers: &HeaderMap) -> ConsumerIdentity {
    if gateway.profile() == Profile::Local {
        return ConsumerIdentity::local();
    }
    let assertion = headers
        .get("x-jwt-assertion")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_owned)
        });
    match assertion {
        Some(token) => ConsumerIdentity::from_bearer_claims(&token),
        None => {
            tracing::warn!("request carries no consumer assertion");
            ConsumerIdentity::default()
        }
    }
}
