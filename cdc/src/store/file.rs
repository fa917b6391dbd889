use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};
use crate::store::PositionStore;
use crate::types::Position;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredState {
    position: Option<Position>,
    heartbeat: Option<u64>,
}

/// Position store keeping its state in a JSON file.
///
/// Every write replaces the file through a temporary sibling and a rename, so a crash never
/// leaves a partially written position behind.
#[derive(Debug, Clone)]
pub struct FilePositionStore {
    path: PathBuf,
    // Serializes writers and holds the last state written.
    state: Arc<Mutex<Option<StoredState>>>,
}

impl FilePositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CdcResult<StoredState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                cdc_error!(
                    ErrorKind::PositionStoreFailed,
                    "The stored position is corrupted",
                    self.path.display(),
                    source: err
                )
            }),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(StoredState::default()),
            Err(err) => Err(cdc_error!(
                ErrorKind::PositionStoreFailed,
                "Could not read the stored position",
                self.path.display(),
                source: err
            )),
        }
    }

    async fn persist(&self, state: &StoredState) -> CdcResult<()> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let bytes = serde_json::to_vec_pretty(state)?;
        let write = async {
            tokio::fs::write(&tmp_path, &bytes).await?;
            tokio::fs::rename(&tmp_path, &self.path).await
        };

        write.await.map_err(|err| {
            cdc_error!(
                ErrorKind::PositionStoreFailed,
                "Could not write the position file",
                self.path.display(),
                source: err
            )
        })
    }

    async fn update<F>(&self, apply: F) -> CdcResult<StoredState>
    where
        F: FnOnce(&mut StoredState) + Send,
    {
        let mut cached = self.state.lock().await;
        let mut state = match cached.as_ref() {
            Some(state) => state.clone(),
            None => self.load().await?,
        };

        apply(&mut state);
        self.persist(&state).await?;
        *cached = Some(state.clone());

        Ok(state)
    }
}

impl PositionStore for FilePositionStore {
    async fn get(&self) -> CdcResult<Option<Position>> {
        let cached = self.state.lock().await;
        if let Some(state) = cached.as_ref() {
            return Ok(state.position.clone());
        }
        drop(cached);

        Ok(self.load().await?.position)
    }

    async fn set(&self, position: Position) -> CdcResult<()> {
        debug!(%position, path = %self.path.display(), "storing position");
        self.update(|state| state.position = Some(position)).await?;

        Ok(())
    }

    async fn heartbeat(&self) -> CdcResult<u64> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let state = self
            .update(|state| {
                let next = match state.heartbeat {
                    Some(last) if last >= now => last + 1,
                    _ => now,
                };
                state.heartbeat = Some(next);
            })
            .await?;

        Ok(state.heartbeat.unwrap_or(now))
    }
}
