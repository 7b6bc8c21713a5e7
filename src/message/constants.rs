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

//! Record batch (magic 2) layout.
//!
//! ```text
//! base offset            i64   0
//! length                 i32   8   bytes after this field
//! partition leader epoch i32   12
//! magic                  i8    16
//! crc                    u32   17  crc32c of attributes..end
//! attributes             i16   21
//! last offset delta      i32   23
//! first timestamp        i64   27
//! max timestamp          i64   35
//! producer id            i64   43
//! producer epoch         i16   51
//! base sequence          i32   53
//! record count           i32   57
//! records                      61
//! ```
//!
//! Legacy message sets (magic 0 and 1) keep the magic byte at the same
//! position, which is how they are recognised and rejected.

pub const BASE_OFFSET_OFFSET: usize = 0;
pub const LENGTH_OFFSET: usize = BASE_OFFSET_OFFSET + 8;
/// base offset plus length field, the part not counted by `length`
pub const LOG_OVERHEAD: usize = LENGTH_OFFSET + 4;
pub const PARTITION_LEADER_EPOCH_OFFSET: usize = LOG_OVERHEAD;
pub const MAGIC_OFFSET: usize = PARTITION_LEADER_EPOCH_OFFSET + 4;
pub const CRC_OFFSET: usize = MAGIC_OFFSET + 1;
pub const ATTRIBUTES_OFFSET: usize = CRC_OFFSET + 4;
pub const LAST_OFFSET_DELTA_OFFSET: usize = ATTRIBUTES_OFFSET + 2;
pub const FIRST_TIMESTAMP_OFFSET: usize = LAST_OFFSET_DELTA_OFFSET + 4;
pub const MAX_TIMESTAMP_OFFSET: usize = FIRST_TIMESTAMP_OFFSET + 8;
pub const PRODUCER_ID_OFFSET: usize = MAX_TIMESTAMP_OFFSET + 8;
pub const PRODUCER_EPOCH_OFFSET: usize = PRODUCER_ID_OFFSET + 8;
pub const BASE_SEQUENCE_OFFSET: usize = PRODUCER_EPOCH_OFFSET + 2;
pub const RECORDS_COUNT_OFFSET: usize = BASE_SEQUENCE_OFFSET + 4;
pub const RECORDS_OFFSET: usize = RECORDS_COUNT_OFFSET + 4;
pub const RECORD_BATCH_OVERHEAD: usize = RECORDS_OFFSET;

/// Current message format version, the only one this client reads or writes.
pub const MAGIC: i8 = 2;
pub const NO_PRODUCER_ID: i64 = -1;
pub const NO_PRODUCER_EPOCH: i16 = -1;
pub const NO_SEQUENCE: i32 = -1;
pub const NO_PARTITION_LEADER_EPOCH: i32 = -1;

// attribute bits
pub const COMPRESSION_CODEC_MASK: i16 = 0x07;
pub const TRANSACTIONAL_FLAG_MASK: i16 = 0x10;
pub const CONTROL_FLAG_MASK: i16 = 0x20;
