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

use crate::message::constants::*;
use crate::message::record::Record;
use crate::service::{AppError, AppResult, CompressionType};

/// A magic 2 record batch backed by its raw bytes.
///
/// Construction through [`RecordBatch::try_new`] guarantees the fixed header
/// is present, so the header getters never read past the buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct RecordBatch {
    buffer: Bytes,
}

impl std::fmt::Debug for RecordBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBatch")
            .field("base_offset", &self.base_offset())
            .field("records_count", &self.records_count())
            .field("size", &self.buffer.len())
            .finish()
    }
}

impl RecordBatch {
    /// Wraps a complete batch, checking the magic byte and header size.
    ///
    /// # Arguments
    /// * `buffer` - exactly one batch, log overhead included
    pub fn try_new(buffer: Bytes) -> AppResult<Self> {
        if buffer.len() <= MAGIC_OFFSET {
            return Err(AppError::CorruptMessage(format!(
                "record batch of {} bytes is too short",
                buffer.len()
            )));
        }
        let magic = buffer[MAGIC_OFFSET] as i8;
        if magic != MAGIC {
            return Err(AppError::CorruptMessage(format!(
                "only message format magic {} is supported, found {}",
                MAGIC, magic
            )));
        }
        if buffer.len() < RECORD_BATCH_OVERHEAD {
            return Err(AppError::CorruptMessage(format!(
                "record batch of {} bytes is smaller than the {} byte header",
                buffer.len(),
                RECORD_BATCH_OVERHEAD
            )));
        }
        Ok(RecordBatch { buffer })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn base_offset(&self) -> i64 {
        (&self.buffer[BASE_OFFSET_OFFSET..]).get_i64()
    }

    pub fn last_offset_delta(&self) -> i32 {
        (&self.buffer[LAST_OFFSET_DELTA_OFFSET..]).get_i32()
    }

    /// Offset of the last record, valid even when compaction removed records.
    pub fn last_offset(&self) -> i64 {
        self.base_offset() + self.last_offset_delta() as i64
    }

    pub fn base_timestamp(&self) -> i64 {
        (&self.buffer[FIRST_TIMESTAMP_OFFSET..]).get_i64()
    }

    pub fn max_timestamp(&self) -> i64 {
        (&self.buffer[MAX_TIMESTAMP_OFFSET..]).get_i64()
    }

    pub fn attributes(&self) -> i16 {
        (&self.buffer[ATTRIBUTES_OFFSET..]).get_i16()
    }

    pub fn records_count(&self) -> i32 {
        (&self.buffer[RECORDS_COUNT_OFFSET..]).get_i32()
    }

    pub fn compression(&self) -> Option<CompressionType> {
        CompressionType::from_attributes(self.attributes() & COMPRESSION_CODEC_MASK)
    }

    /// Transaction markers, never handed to the application.
    pub fn is_control(&self) -> bool {
        self.attributes() & CONTROL_FLAG_MASK != 0
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes() & TRANSACTIONAL_FLAG_MASK != 0
    }

    /// Checks the crc over attributes..end and the record count sign.
    pub fn validate(&self) -> AppResult<()> {
        let stored = (&self.buffer[CRC_OFFSET..]).get_u32();
        let computed = crc32c::crc32c(&self.buffer[ATTRIBUTES_OFFSET..]);
        if stored != computed {
            return Err(AppError::CorruptMessage(format!(
                "CRC mismatch: expected {}, but found {}",
                computed, stored
            )));
        }
        if self.records_count() < 0 {
            return Err(AppError::CorruptMessage(format!(
                "record count should be non-negative, but found {}",
                self.records_count()
            )));
        }
        Ok(())
    }

    /// Decodes every record of an uncompressed batch.
    ///
    /// Compressed batches fail with [`AppError::UnsupportedCompression`].
    pub fn records(&self) -> AppResult<Vec<Record>> {
        match self.compression() {
            Some(CompressionType::None) => {}
            other => {
                return Err(AppError::UnsupportedCompression(format!(
                    "batch at offset {} uses {:?}",
                    self.base_offset(),
                    other
                )))
            }
        }
        let count = self.records_count().max(0) as usize;
        let mut buf = self.buffer.slice(RECORDS_OFFSET..);
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            records.push(Record::decode(&mut buf)?);
        }
        Ok(records)
    }
}

/// Builds one uncompressed magic 2 batch with consecutive offsets.
pub struct RecordBatchBuilder {
    records: BytesMut,
    base_offset: i64,
    base_timestamp: Option<i64>,
    max_timestamp: i64,
    record_count: i32,
}

impl RecordBatchBuilder {
    /// Producers write base offset 0, the broker assigns the real one.
    pub fn new(base_offset: i64) -> Self {
        RecordBatchBuilder {
            records: BytesMut::new(),
            base_offset,
            base_timestamp: None,
            max_timestamp: -1,
            record_count: 0,
        }
    }

    /// Appends a record at the next offset.
    ///
    /// # Arguments
    /// * `key` - `None` writes a null key
    /// * `value` - record value
    /// * `timestamp` - create time in epoch milliseconds
    pub fn append(&mut self, key: Option<&[u8]>, value: &[u8], timestamp: i64) {
        let base_timestamp = *self.base_timestamp.get_or_insert(timestamp);
        self.max_timestamp = self.max_timestamp.max(timestamp);
        Record::encode(
            &mut self.records,
            timestamp - base_timestamp,
            self.record_count,
            key,
            value,
        );
        self.record_count += 1;
    }

    pub fn record_count(&self) -> i32 {
        self.record_count
    }

    pub fn estimated_size(&self) -> usize {
        RECORD_BATCH_OVERHEAD + self.records.len()
    }

    pub fn build(self) -> AppResult<RecordBatch> {
        if self.record_count == 0 {
            return Err(AppError::InvalidValue(
                "cannot build an empty record batch".to_string(),
            ));
        }
        let total = RECORD_BATCH_OVERHEAD + self.records.len();
        let mut buffer = BytesMut::with_capacity(total);
        buffer.put_i64(self.base_offset);
        buffer.put_i32((total - LOG_OVERHEAD) as i32);
        buffer.put_i32(NO_PARTITION_LEADER_EPOCH);
        buffer.put_i8(MAGIC);
        buffer.put_u32(0); // crc, filled below
        buffer.put_i16(CompressionType::None.attribute_bits());
        buffer.put_i32(self.record_count - 1);
        buffer.put_i64(self.base_timestamp.unwrap_or(-1));
        buffer.put_i64(self.max_timestamp);
        buffer.put_i64(NO_PRODUCER_ID);
        buffer.put_i16(NO_PRODUCER_EPOCH);
        buffer.put_i32(NO_SEQUENCE);
        buffer.put_i32(self.record_count);
        buffer.put_slice(&self.records);

        let crc = crc32c::crc32c(&buffer[ATTRIBUTES_OFFSET..]);
        buffer[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());

        RecordBatch::try_new(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> RecordBatch {
        let mut builder = RecordBatchBuilder::new(100);
        builder.append(Some(b"k1".as_slice()), b"v1", 1_000);
        builder.append(None, b"v2", 1_005);
        builder.append(Some(b"k3".as_slice()), b"v3", 1_002);
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_header_fields() {
        let batch = sample_batch();
        assert_eq!(batch.base_offset(), 100);
        assert_eq!(batch.last_offset(), 102);
        assert_eq!(batch.records_count(), 3);
        assert_eq!(batch.base_timestamp(), 1_000);
        assert_eq!(batch.max_timestamp(), 1_005);
        assert_eq!(batch.compression(), Some(CompressionType::None));
        assert!(!batch.is_control());
        batch.validate().unwrap();
    }

    #[test]
    fn test_records_decode_in_order() {
        let records = sample_batch().records().unwrap();
        let deltas: Vec<i32> = records.iter().map(|r| r.offset_delta).collect();
        assert_eq!(deltas, vec![0, 1, 2]);
        assert_eq!(records[1].key, None);
        assert_eq!(records[1].timestamp_delta, 5);
        assert_eq!(records[2].value.as_deref(), Some(b"v3".as_slice()));
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut raw = BytesMut::from(sample_batch().as_bytes());
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let batch = RecordBatch::try_new(raw.freeze()).unwrap();
        assert!(matches!(batch.validate(), Err(AppError::CorruptMessage(_))));
    }

    #[test]
    fn test_compressed_batch_is_rejected() {
        let mut raw = BytesMut::from(sample_batch().as_bytes());
        raw[ATTRIBUTES_OFFSET + 1] |= CompressionType::Snappy.attribute_bits() as u8;
        let batch = RecordBatch::try_new(raw.freeze()).unwrap();
        assert!(matches!(
            batch.records(),
            Err(AppError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn test_legacy_magic_is_rejected() {
        let mut raw = BytesMut::from(sample_batch().as_bytes());
        raw[MAGIC_OFFSET] = 1;
        assert!(RecordBatch::try_new(raw.freeze()).is_err());
    }

    #[test]
    fn test_empty_builder_fails() {
        assert!(RecordBatchBuilder::new(0).build().is_err());
    }
}
