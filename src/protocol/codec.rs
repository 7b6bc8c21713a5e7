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

use std::fmt::Debug;

use bytes::{BufMut, Bytes, BytesMut};

use super::types::group_by_topic;
use super::wire::*;
use super::*;
use crate::message::TopicPartition;
use crate::service::{AppError, AppResult};

/// Turns typed requests into wire bytes and wire bytes back into typed responses.
///
/// The transport only frames and correlates; everything between the length
/// prefix and the next frame belongs to the codec. Alternative encodings plug
/// in through [`crate::Cluster::with_codec`].
pub trait Codec: Send + Sync + Debug {
    /// Version the codec speaks for `api_key`, sent in the request header.
    fn api_version(&self, api_key: ApiKey) -> i16;

    /// Writes the request header and body, without the length prefix.
    fn encode_request(
        &self,
        header: &RequestHeader,
        request: &Request,
        dst: &mut BytesMut,
    ) -> AppResult<()>;

    /// Decodes a response body, the correlation id is already consumed.
    fn decode_response(&self, api_key: ApiKey, api_version: i16, body: Bytes)
        -> AppResult<Response>;
}

/// Kafka binary protocol: metadata v1, produce v3, fetch v5, list offsets v1.
#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaCodec;

impl KafkaCodec {
    pub const METADATA_VERSION: i16 = 1;
    pub const PRODUCE_VERSION: i16 = 3;
    pub const FETCH_VERSION: i16 = 5;
    pub const LIST_OFFSETS_VERSION: i16 = 1;

    fn encode_metadata(request: &MetadataRequest, dst: &mut BytesMut) {
        match &request.topics {
            None => dst.put_i32(-1),
            Some(topics) => write_array(dst, topics, |dst, topic| write_string(dst, topic)),
        }
    }

    fn encode_produce(request: &ProduceRequest, dst: &mut BytesMut) {
        // transactional id
        write_nullable_string(dst, None);
        dst.put_i16(request.required_acks);
        dst.put_i32(request.timeout_ms);
        let grouped = group_by_topic(&request.partition_data);
        dst.put_i32(grouped.len() as i32);
        for (topic, partitions) in grouped {
            write_string(dst, topic);
            write_array(dst, &partitions, |dst, (partition, records)| {
                dst.put_i32(*partition);
                write_bytes(dst, records);
            });
        }
    }

    fn encode_fetch(request: &FetchRequest, dst: &mut BytesMut) {
        dst.put_i32(request.replica_id);
        dst.put_i32(request.max_wait_ms);
        dst.put_i32(request.min_bytes);
        dst.put_i32(request.max_bytes);
        dst.put_i8(request.isolation_level);
        let grouped = group_by_topic(&request.fetch_data);
        dst.put_i32(grouped.len() as i32);
        for (topic, partitions) in grouped {
            write_string(dst, topic);
            write_array(dst, &partitions, |dst, (partition, data)| {
                dst.put_i32(*partition);
                dst.put_i64(data.fetch_offset);
                dst.put_i64(data.log_start_offset);
                dst.put_i32(data.max_bytes);
            });
        }
    }

    fn encode_list_offsets(request: &ListOffsetsRequest, dst: &mut BytesMut) {
        dst.put_i32(request.replica_id);
        let grouped = group_by_topic(&request.partitions);
        dst.put_i32(grouped.len() as i32);
        for (topic, partitions) in grouped {
            write_string(dst, topic);
            write_array(dst, &partitions, |dst, (partition, timestamp)| {
                dst.put_i32(*partition);
                dst.put_i64(**timestamp);
            });
        }
    }

    fn decode_metadata(buf: &mut Bytes) -> AppResult<MetadataResponse> {
        let brokers = read_array(buf, |buf| {
            Ok(MetadataBroker {
                node_id: read_i32(buf)?,
                host: read_string(buf)?,
                port: read_i32(buf)?,
                rack: read_nullable_string(buf)?,
            })
        })?;
        let controller_id = read_i32(buf)?;
        let topics = read_array(buf, |buf| {
            Ok(MetadataTopic {
                error_code: ErrorCode::from_code(read_i16(buf)?),
                name: read_string(buf)?,
                is_internal: read_bool(buf)?,
                partitions: read_array(buf, |buf| {
                    Ok(MetadataPartition {
                        error_code: ErrorCode::from_code(read_i16(buf)?),
                        partition: read_i32(buf)?,
                        leader: read_i32(buf)?,
                        replicas: read_array(buf, read_i32)?,
                        isr: read_array(buf, read_i32)?,
                    })
                })?,
            })
        })?;
        Ok(MetadataResponse {
            brokers,
            controller_id,
            topics,
        })
    }

    /// Reads `[topic [partition ...]]`, handing each partition body to `read_partition`.
    fn decode_topic_partitions<T>(
        buf: &mut Bytes,
        mut read_partition: impl FnMut(&mut Bytes) -> AppResult<T>,
    ) -> AppResult<Vec<(TopicPartition, T)>> {
        let mut entries = Vec::new();
        let topic_count = read_array_len(buf)?.unwrap_or(0);
        for _ in 0..topic_count {
            let topic = read_string(buf)?;
            let partition_count = read_array_len(buf)?.unwrap_or(0);
            for _ in 0..partition_count {
                let partition = read_i32(buf)?;
                let value = read_partition(buf)?;
                entries.push((TopicPartition::new(topic.clone(), partition), value));
            }
        }
        Ok(entries)
    }

    fn decode_produce(buf: &mut Bytes) -> AppResult<ProduceResponse> {
        let responses = Self::decode_topic_partitions(buf, |buf| {
            Ok(ProducePartitionResponse {
                error_code: ErrorCode::from_code(read_i16(buf)?),
                base_offset: read_i64(buf)?,
                log_append_time: read_i64(buf)?,
            })
        })?;
        let throttle_time_ms = read_i32(buf)?;
        Ok(ProduceResponse {
            responses: responses.into_iter().collect(),
            throttle_time_ms,
        })
    }

    fn decode_fetch(buf: &mut Bytes) -> AppResult<FetchResponse> {
        let throttle_time_ms = read_i32(buf)?;
        let responses = Self::decode_topic_partitions(buf, |buf| {
            let error_code = ErrorCode::from_code(read_i16(buf)?);
            let high_watermark = read_i64(buf)?;
            let last_stable_offset = read_i64(buf)?;
            let log_start_offset = read_i64(buf)?;
            // aborted transactions, only meaningful for read_committed
            let _aborted = read_array(buf, |buf| Ok((read_i64(buf)?, read_i64(buf)?)))?;
            let records = read_nullable_bytes(buf)?.unwrap_or_default();
            Ok(FetchPartitionResponse {
                error_code,
                high_watermark,
                last_stable_offset,
                log_start_offset,
                records,
            })
        })?;
        Ok(FetchResponse {
            throttle_time_ms,
            responses: responses.into_iter().collect(),
        })
    }

    fn decode_list_offsets(buf: &mut Bytes) -> AppResult<ListOffsetsResponse> {
        let responses = Self::decode_topic_partitions(buf, |buf| {
            Ok(ListOffsetsPartitionResponse {
                error_code: ErrorCode::from_code(read_i16(buf)?),
                timestamp: read_i64(buf)?,
                offset: read_i64(buf)?,
            })
        })?;
        Ok(ListOffsetsResponse {
            responses: responses.into_iter().collect(),
        })
    }
}

impl Codec for KafkaCodec {
    fn api_version(&self, api_key: ApiKey) -> i16 {
        match api_key {
            ApiKey::Metadata => Self::METADATA_VERSION,
            ApiKey::Produce => Self::PRODUCE_VERSION,
            ApiKey::Fetch => Self::FETCH_VERSION,
            ApiKey::ListOffsets => Self::LIST_OFFSETS_VERSION,
        }
    }

    fn encode_request(
        &self,
        header: &RequestHeader,
        request: &Request,
        dst: &mut BytesMut,
    ) -> AppResult<()> {
        if header.api_key != request.api_key() {
            return Err(AppError::IllegalStateError(format!(
                "header api key {:?} does not match request {:?}",
                header.api_key,
                request.api_key()
            )));
        }
        if header.api_version != self.api_version(header.api_key) {
            return Err(AppError::MalformedProtocol(format!(
                "{:?} version {} is not supported",
                header.api_key, header.api_version
            )));
        }
        dst.put_i16(header.api_key as i16);
        dst.put_i16(header.api_version);
        dst.put_i32(header.correlation_id);
        write_nullable_string(dst, header.client_id.as_deref());

        match request {
            Request::Metadata(request) => Self::encode_metadata(request, dst),
            Request::Produce(request) => Self::encode_produce(request, dst),
            Request::Fetch(request) => Self::encode_fetch(request, dst),
            Request::ListOffsets(request) => Self::encode_list_offsets(request, dst),
        }
        Ok(())
    }

    fn decode_response(
        &self,
        api_key: ApiKey,
        api_version: i16,
        mut body: Bytes,
    ) -> AppResult<Response> {
        if api_version != self.api_version(api_key) {
            return Err(AppError::MalformedProtocol(format!(
                "{:?} version {} is not supported",
                api_key, api_version
            )));
        }
        let buf = &mut body;
        let response = match api_key {
            ApiKey::Metadata => Response::Metadata(Self::decode_metadata(buf)?),
            ApiKey::Produce => Response::Produce(Self::decode_produce(buf)?),
            ApiKey::Fetch => Response::Fetch(Self::decode_fetch(buf)?),
            ApiKey::ListOffsets => Response::ListOffsets(Self::decode_list_offsets(buf)?),
        };
        Ok(response)
    }
}
