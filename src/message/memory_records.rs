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

use std::fmt::{Debug, Formatter};

use bytes::{Buf, Bytes};

use crate::message::constants::{LENGTH_OFFSET, LOG_OVERHEAD};
use crate::message::RecordBatch;
use crate::service::{AppError, AppResult};

/// A run of record batches as returned by a fetch.
///
/// Brokers cut the response at `max_bytes`, so the last batch may be
/// partial. Iteration stops silently before a partial batch; it is fetched
/// again from the next cursor.
pub struct MemoryRecords {
    buffer: Bytes,
}

impl Debug for MemoryRecords {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecords")
            .field("buffer length", &self.buffer.len())
            .finish()
    }
}

impl MemoryRecords {
    pub fn new(buffer: Bytes) -> MemoryRecords {
        MemoryRecords { buffer }
    }

    pub fn empty() -> Self {
        MemoryRecords {
            buffer: Bytes::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn next_batch_size(&self) -> Option<AppResult<usize>> {
        if self.buffer.len() < LOG_OVERHEAD {
            return None;
        }
        let length = (&self.buffer[LENGTH_OFFSET..]).get_i32();
        if length < 0 {
            return Some(Err(AppError::CorruptMessage(format!(
                "negative record batch length {}",
                length
            ))));
        }
        Some(Ok(length as usize + LOG_OVERHEAD))
    }
}

impl Iterator for MemoryRecords {
    type Item = AppResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch_size()? {
            Ok(batch_size) if batch_size > self.buffer.len() => None,
            Ok(batch_size) => {
                let batch = self.buffer.split_to(batch_size);
                let batch = RecordBatch::try_new(batch).and_then(|batch| {
                    batch.validate()?;
                    Ok(batch)
                });
                if batch.is_err() {
                    self.buffer.clear();
                }
                Some(batch)
            }
            Err(e) => {
                self.buffer.clear();
                Some(Err(e))
            }
        }
    }
}
