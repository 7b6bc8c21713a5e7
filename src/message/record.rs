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

use bytes::{Buf, BufMut, Bytes, BytesMut};
use integer_encoding::VarInt;

use crate::service::{AppError, AppResult};

/// A single record decoded from a record batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub attributes: i8,
    pub timestamp_delta: i64,
    pub offset_delta: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<RecordHeader>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub key: String,
    pub value: Option<Bytes>,
}

impl Record {
    /// Decodes one length prefixed record, advancing `buf` past it.
    pub fn decode(buf: &mut Bytes) -> AppResult<Record> {
        let length = read_varint_i32(buf)?;
        if length < 0 || length as usize > buf.remaining() {
            return Err(AppError::CorruptMessage(format!(
                "record length {} exceeds the {} bytes left in the batch",
                length,
                buf.remaining()
            )));
        }
        let mut body = buf.split_to(length as usize);
        if !body.has_remaining() {
            return Err(AppError::CorruptMessage("empty record body".to_string()));
        }
        let attributes = body.get_i8();
        let timestamp_delta = read_varint_i64(&mut body)?;
        let offset_delta = read_varint_i32(&mut body)?;
        let key = read_varint_bytes(&mut body)?;
        let value = read_varint_bytes(&mut body)?;

        let header_count = read_varint_i32(&mut body)?;
        let mut headers = Vec::with_capacity(header_count.max(0) as usize);
        for _ in 0..header_count {
            let key = read_varint_bytes(&mut body)?.unwrap_or_default();
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| AppError::CorruptMessage(format!("record header key: {}", e)))?;
            let value = read_varint_bytes(&mut body)?;
            headers.push(RecordHeader { key, value });
        }

        Ok(Record {
            attributes,
            timestamp_delta,
            offset_delta,
            key,
            value,
            headers,
        })
    }

    /// Writes a header-less record with a null or present key.
    pub(crate) fn encode(
        dst: &mut BytesMut,
        timestamp_delta: i64,
        offset_delta: i32,
        key: Option<&[u8]>,
        value: &[u8],
    ) {
        let key_size = match key {
            Some(key) => (key.len() as i32).required_space() + key.len(),
            None => (-1i32).required_space(),
        };
        let body_size = 1
            + timestamp_delta.required_space()
            + offset_delta.required_space()
            + key_size
            + (value.len() as i32).required_space()
            + value.len()
            + 0i32.required_space();

        dst.put_slice(&(body_size as i32).encode_var_vec());
        dst.put_i8(0);
        dst.put_slice(&timestamp_delta.encode_var_vec());
        dst.put_slice(&offset_delta.encode_var_vec());
        match key {
            Some(key) => {
                dst.put_slice(&(key.len() as i32).encode_var_vec());
                dst.put_slice(key);
            }
            None => dst.put_slice(&(-1i32).encode_var_vec()),
        }
        dst.put_slice(&(value.len() as i32).encode_var_vec());
        dst.put_slice(value);
        dst.put_slice(&0i32.encode_var_vec());
    }
}

fn read_varint_i32(buf: &mut Bytes) -> AppResult<i32> {
    let (value, read) = i32::decode_var(buf.chunk())
        .ok_or_else(|| AppError::CorruptMessage("truncated varint".to_string()))?;
    buf.advance(read);
    Ok(value)
}

fn read_varint_i64(buf: &mut Bytes) -> AppResult<i64> {
    let (value, read) = i64::decode_var(buf.chunk())
        .ok_or_else(|| AppError::CorruptMessage("truncated varlong".to_string()))?;
    buf.advance(read);
    Ok(value)
}

/// Varint length followed by bytes, a negative length is null.
fn read_varint_bytes(buf: &mut Bytes) -> AppResult<Option<Bytes>> {
    let len = read_varint_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    if len as usize > buf.remaining() {
        return Err(AppError::CorruptMessage(format!(
            "field length {} exceeds the {} bytes left in the record",
            len,
            buf.remaining()
        )));
    }
    Ok(Some(buf.split_to(len as usize)))
}
