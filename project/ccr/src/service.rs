//! Request handlers for the checkpoint control surface.

use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use futures_util::StreamExt;
use log::info;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use rrwfs::cadapter::client::BlobBackend;
use rrwfs::cadapter::localfs::LocalFsBackend;
use rrwfs::chunk::split_tar;
use rrwfs::fuse::mount::mount_rrw;

use crate::error::AppError;
use crate::model::{Checkpoint, CcrMount};
use crate::state::AppState;

type Result<T> = std::result::Result<T, AppError>;

/// Allocate the next round for a (sandbox, container) pair. Rounds grow
/// from the latest committed checkpoint; uncommitted rounds are abandoned.
pub async fn create_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Checkpoint>,
) -> Result<Json<Checkpoint>> {
    if req.sandbox.is_empty() || req.container.is_empty() {
        return Err(AppError::BadRequest(
            "sandbox and container are required".into(),
        ));
    }

    let round = match state
        .store
        .latest_committed(&req.sandbox, &req.container)
        .await?
    {
        Some(latest) => latest.round + 1,
        None => 1,
    };

    let reference = format!(
        "{}/{}:checkpoint-{}-{}-v{}",
        state.config.registry_host, state.config.registry_namespace, req.sandbox, req.container,
        round
    );
    let checkpoint = Checkpoint {
        id: Uuid::new_v4().to_string(),
        sandbox: req.sandbox,
        container: req.container,
        round,
        reference,
        committed: false,
        mount: CcrMount::default(),
    };
    state.store.insert(&checkpoint).await?;
    info!(
        "created checkpoint {} round {}",
        checkpoint.id, checkpoint.round
    );
    Ok(Json(checkpoint))
}

pub async fn commit_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Checkpoint>,
) -> Result<Json<Checkpoint>> {
    let Some(mut checkpoint) = state.store.get(&req.id).await? else {
        return Err(AppError::NotFound(format!("checkpoint {}", req.id)));
    };
    state.store.set_committed(&checkpoint.id).await?;
    checkpoint.committed = true;
    Ok(Json(checkpoint))
}

/// The latest committed checkpoint, or an empty record when none exists.
pub async fn get_checkpoint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<Checkpoint>,
) -> Result<Json<Checkpoint>> {
    let latest = state
        .store
        .latest_committed(&req.sandbox, &req.container)
        .await?;
    Ok(Json(latest.unwrap_or_default()))
}

#[derive(Deserialize)]
pub struct UploadParams {
    pub id: String,
}

/// Receive a checkpoint tar and split it: the metadata tar lands in the
/// store path, every chunk in the shared block pool. The spooled upload
/// is discarded afterwards.
pub async fn upload_tar(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    body: Body,
) -> Result<Json<Checkpoint>> {
    let Some(mut checkpoint) = state.store.get(&params.id).await? else {
        return Err(AppError::NotFound(format!("checkpoint {}", params.id)));
    };

    let spool = state
        .config
        .scratch_path
        .join(format!("upload-{}", checkpoint.id));
    let mut file = tokio::fs::File::create(&spool).await?;
    let mut stream = body.into_data_stream();
    while let Some(piece) = stream.next().await {
        let piece = piece.map_err(|e| AppError::BadRequest(format!("read body: {e}")))?;
        file.write_all(&piece).await?;
    }
    file.flush().await?;
    drop(file);

    let tarname = format!("meta-{}.tar", checkpoint.id);
    let split = split_upload(&state, &spool, &tarname).await;
    let _ = tokio::fs::remove_file(&spool).await;
    let report = split?;
    info!(
        "split checkpoint {}: {} entries, {} chunked files, {} unique chunks",
        checkpoint.id, report.entries, report.chunked_files, report.unique_chunks
    );

    let mount = CcrMount {
        typ: "rrw".into(),
        source: tarname,
        options: Vec::new(),
    };
    state.store.set_mount(&checkpoint.id, &mount).await?;
    checkpoint.mount = mount;
    Ok(Json(checkpoint))
}

async fn split_upload(
    state: &AppState,
    spool: &Path,
    tarname: &str,
) -> Result<rrwfs::chunk::SplitReport> {
    let source = std::fs::File::open(spool)?;
    let meta = std::fs::File::create(state.config.store_path.join(tarname))?;
    let backend = Arc::new(LocalFsBackend::new(&state.config.block_path));
    Ok(split_tar(source, meta, backend).await?)
}

#[derive(Deserialize)]
pub struct MountParams {
    pub tarname: String,
    pub path: String,
}

pub async fn mount(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MountParams>,
) -> Result<()> {
    if params.tarname.contains('/') {
        return Err(AppError::BadRequest("tarname must be a bare name".into()));
    }
    {
        let mounts = state.mounts.read().await;
        if mounts.contains_key(&params.path) {
            return Err(AppError::BadRequest(format!(
                "{} is already mounted",
                params.path
            )));
        }
    }

    let meta = std::fs::File::open(state.config.store_path.join(&params.tarname))
        .map_err(|e| AppError::NotFound(format!("metadata tar {}: {e}", params.tarname)))?;
    let backend: Arc<dyn BlobBackend> = Arc::new(LocalFsBackend::new(&state.config.block_path));
    let session = mount_rrw(meta, backend, &state.config.cache_path, &params.path).await?;

    state.mounts.write().await.insert(params.path, session);
    Ok(())
}

#[derive(Deserialize)]
pub struct UnmountParams {
    pub path: String,
}

pub async fn unmount(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UnmountParams>,
) -> Result<()> {
    let Some(session) = state.mounts.write().await.remove(&params.path) else {
        return Err(AppError::NotFound(format!("mount {}", params.path)));
    };
    session.unmount().await?;
    Ok(())
}
