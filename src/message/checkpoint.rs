// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::TopicPartitionOffsets;
use crate::service::{AppError, AppResult};

/// Persists consumer positions so a restarted consumer resumes where it stopped.
///
/// File layout: one version byte followed by the binary form of
/// [`TopicPartitionOffsets`]. Writes go to a sibling temp file that is
/// synced and renamed over the target.
#[derive(Debug, Clone)]
pub struct OffsetCheckpointFile {
    path: PathBuf,
    version: i8,
}

impl OffsetCheckpointFile {
    pub const CK_FILE_VERSION_1: i8 = 1;

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            version: Self::CK_FILE_VERSION_1,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, offsets: &TopicPartitionOffsets) -> AppResult<()> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)
            .await?;
        file.write_all(&[self.version as u8]).await?;
        file.write_all(&offsets.write_offsets()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), %offsets, "offset checkpoint written");
        Ok(())
    }

    /// Loads the checkpoint, `None` when the file does not exist yet.
    pub async fn load(&self) -> AppResult<Option<TopicPartitionOffsets>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    path = %self.path.display(),
                    "offset checkpoint not found, starting without one"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let (version, body) = content
            .split_first()
            .ok_or_else(|| AppError::InvalidValue("offset checkpoint is empty".to_string()))?;
        if *version as i8 != self.version {
            return Err(AppError::InvalidValue(format!(
                "offset checkpoint version {} is not supported, expected {}",
                version, self.version
            )));
        }
        TopicPartitionOffsets::from_bytes(body).map(Some)
    }
}
