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

//! Network Module Implementation
//!
//! Client side transport to a single broker, built on tokio's async I/O.
//!
//! # Architecture
//!
//! Each [`BrokerConnection`] owns one TCP socket driven by a dedicated task.
//! Callers hand requests to the task over a channel and await a oneshot
//! response. The task assigns correlation ids, writes length prefixed
//! frames and matches responses back to their callers, so one socket
//! carries many concurrent requests.
//!
//! # Components
//!
//! - `Connection`: buffered read side producing `ResponseFrame`s
//! - `ResponseFrame`: frame size validation and parsing
//! - `BrokerConnection`: multiplexed request/response channel to a broker
//! - `CloseReason`: why a connection stopped, mapped onto caller errors

pub use connection::{BrokerConnection, CloseReason, Connection};
pub use frame::ResponseFrame;
mod connection;
mod frame;
