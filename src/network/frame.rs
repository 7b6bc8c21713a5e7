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

use bytes::{Buf, Bytes, BytesMut};

use crate::service::AppError::Incomplete;
use crate::service::{AppError, AppResult};

/// One length delimited response read off a broker connection.
#[derive(Debug)]
pub struct ResponseFrame {
    pub correlation_id: i32,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Checks whether `buffer` holds a complete frame.
    ///
    /// Returns [`Incomplete`] when more bytes are needed (reserving room for
    /// the rest of the frame) and an error when the size prefix is negative,
    /// too small for a correlation id, or above `max_frame_size`.
    pub fn check(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<()> {
        if buffer.remaining() < 4 {
            return Err(Incomplete);
        }
        let body_size = (&buffer[..4]).get_i32();
        if body_size < 4 {
            return Err(AppError::DetailedIoError(format!(
                "frame size {} is too small for a response",
                body_size
            )));
        }
        if body_size as usize > max_frame_size {
            return Err(AppError::DetailedIoError(format!(
                "Frame of length {} is too large.",
                body_size
            )));
        }
        if buffer.remaining() < body_size as usize + 4 {
            buffer.reserve(body_size as usize + 4);
            return Err(Incomplete);
        }
        Ok(())
    }

    pub fn parse(buffer: &mut BytesMut, max_frame_size: usize) -> AppResult<Option<ResponseFrame>> {
        match ResponseFrame::check(buffer, max_frame_size) {
            Ok(_) => {
                let body_length = buffer.get_i32();
                let mut body = buffer.split_to(body_length as usize).freeze();
                let correlation_id = body.get_i32();
                Ok(Some(ResponseFrame {
                    correlation_id,
                    body,
                }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
