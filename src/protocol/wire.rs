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

//! Big-endian primitive readers and writers for the Kafka wire format.
//!
//! Readers check the remaining length first and fail with
//! [`AppError::MalformedProtocol`] instead of panicking on short input.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::service::{AppError, AppResult};

fn ensure_remaining(buf: &impl Buf, needed: usize, what: &str) -> AppResult<()> {
    if buf.remaining() < needed {
        return Err(AppError::MalformedProtocol(format!(
            "{} needs {} bytes, only {} remaining",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn read_i8(buf: &mut Bytes) -> AppResult<i8> {
    ensure_remaining(buf, 1, "int8")?;
    Ok(buf.get_i8())
}

pub fn read_i16(buf: &mut Bytes) -> AppResult<i16> {
    ensure_remaining(buf, 2, "int16")?;
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut Bytes) -> AppResult<i32> {
    ensure_remaining(buf, 4, "int32")?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut Bytes) -> AppResult<i64> {
    ensure_remaining(buf, 8, "int64")?;
    Ok(buf.get_i64())
}

pub fn read_bool(buf: &mut Bytes) -> AppResult<bool> {
    Ok(read_i8(buf)? != 0)
}

pub fn read_nullable_string(buf: &mut Bytes) -> AppResult<Option<String>> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Ok(None);
    }
    ensure_remaining(buf, len as usize, "string")?;
    let raw = buf.split_to(len as usize);
    String::from_utf8(raw.to_vec())
        .map(Some)
        .map_err(|e| AppError::MalformedProtocol(format!("invalid utf8 string: {}", e)))
}

pub fn read_string(buf: &mut Bytes) -> AppResult<String> {
    read_nullable_string(buf)?
        .ok_or_else(|| AppError::MalformedProtocol("unexpected null string".to_string()))
}

/// Reads an int32 length prefixed byte blob, a negative length is null.
pub fn read_nullable_bytes(buf: &mut Bytes) -> AppResult<Option<Bytes>> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    ensure_remaining(buf, len as usize, "bytes")?;
    Ok(Some(buf.split_to(len as usize)))
}

/// Reads an array length, `None` for a null array.
pub fn read_array_len(buf: &mut Bytes) -> AppResult<Option<usize>> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    // every element takes at least one byte
    ensure_remaining(buf, len as usize, "array")?;
    Ok(Some(len as usize))
}

pub fn read_array<T>(
    buf: &mut Bytes,
    mut read_one: impl FnMut(&mut Bytes) -> AppResult<T>,
) -> AppResult<Vec<T>> {
    let len = read_array_len(buf)?.unwrap_or(0);
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(read_one(buf)?);
    }
    Ok(items)
}

pub fn write_string(buf: &mut BytesMut, value: &str) {
    buf.put_i16(value.len() as i16);
    buf.put_slice(value.as_bytes());
}

pub fn write_nullable_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => write_string(buf, value),
        None => buf.put_i16(-1),
    }
}

pub fn write_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value);
}

pub fn write_array<T>(
    buf: &mut BytesMut,
    items: &[T],
    mut write_one: impl FnMut(&mut BytesMut, &T),
) {
    buf.put_i32(items.len() as i32);
    for item in items {
        write_one(buf, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_buffer_is_malformed() {
        let mut buf = Bytes::from_static(&[0, 5, b'a', b'b']);
        assert!(matches!(
            read_string(&mut buf),
            Err(AppError::MalformedProtocol(_))
        ));

        let mut buf = Bytes::from_static(&[0, 0]);
        assert!(read_i32(&mut buf).is_err());
    }

    #[test]
    fn test_null_markers() {
        let mut buf = BytesMut::new();
        write_nullable_string(&mut buf, None);
        buf.put_i32(-1);
        buf.put_i32(-1);
        let mut buf = buf.freeze();
        assert_eq!(read_nullable_string(&mut buf).unwrap(), None);
        assert_eq!(read_nullable_bytes(&mut buf).unwrap(), None);
        assert_eq!(read_array(&mut buf, read_i32).unwrap(), Vec::<i32>::new());
        assert!(!buf.has_remaining());
    }
}
