//! # paxoskv Durable State
//!
//! Every externally visible consensus transition is backed by a file write
//! that completes before the reply leaves the node: acceptors persist their
//! promise/accept state, learners persist the decision log and periodic
//! application-state snapshots.
//!
//! All files are JSON documents written atomically: serialize to a temp file
//! in the destination directory, fsync, then rename over the target. A crash
//! at any point leaves either the old or the new document, never a torn one.

mod acceptor;
mod learner;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub use acceptor::{AcceptorStore, PersistedAcceptorState, ProposalRecord};
pub use learner::{LearnerStore, Snapshot};

/// Errors from the persistence layer. Callers treat any of these as a
/// durability failure: the in-flight operation is refused and in-memory
/// state is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io { path: path.display().to_string(), source }
    }
}

/// Atomically replace `path` with the JSON serialization of `value`.
///
/// The temp file lives in the same directory as the target so the final
/// rename stays within one filesystem.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Corrupt {
        path: path.display().to_string(),
        source: e,
    })?;

    let tmp = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    file.write_all(&bytes).await.map_err(|e| StorageError::io(&tmp, e))?;
    file.sync_all().await.map_err(|e| StorageError::io(&tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(|e| StorageError::io(path, e))?;
    debug!(path = %path.display(), bytes = bytes.len(), "persisted state file");
    Ok(())
}

/// Load a JSON document, or `None` when the file does not exist yet.
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}
