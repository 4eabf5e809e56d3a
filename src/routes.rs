use axum::Router;

use crate::quota;

pub fn api_routes() -> Router {
    Router::new().merge(quota::api::routes())
}
