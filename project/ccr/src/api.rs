use std::sync::Arc;

use axum::Router;
use axum::routing::post;

use crate::endpoint;
use crate::service::{
    commit_checkpoint, create_checkpoint, get_checkpoint, mount, unmount, upload_tar,
};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route(endpoint::CREATE_CHECKPOINT, post(create_checkpoint))
        .route(endpoint::COMMIT_CHECKPOINT, post(commit_checkpoint))
        .route(endpoint::GET_CHECKPOINT, post(get_checkpoint))
        .route(endpoint::UPLOAD_TAR, post(upload_tar))
        .route(endpoint::MOUNT, post(mount))
        .route(endpoint::UNMOUNT, post(unmount))
        .with_state(state)
}
