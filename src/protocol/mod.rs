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

//! Protocol Module
//!
//! Typed broker requests and responses plus the [`Codec`] that maps them to
//! bytes. The transport is codec agnostic: it hands a [`Request`] and a
//! [`RequestHeader`] to the codec and gets a [`Response`] back.
//!
//! # Supported apis
//!
//! - Metadata v1: brokers, topics, partition leaders
//! - Produce v3: magic 2 record batches
//! - Fetch v5
//! - ListOffsets v1: earliest and latest offsets

pub use api_key::{ApiKey, RequestHeader};
pub use codec::{Codec, KafkaCodec};
pub use error_code::ErrorCode;
pub use types::*;

mod api_key;
mod codec;
mod error_code;
mod types;
pub mod wire;
