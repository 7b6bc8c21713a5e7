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

//! Consumer Module
//!
//! Resumable consumer of one topic with optional pull based flow control.
//!
//! # Components
//!
//! - `Consumer`: offset resolution, partition loops, acks and positions
//! - `MessageStream`: the caller's end of the delivered messages
//! - fetcher: the per-partition fetch loop
//! - `FlowControl`: high and low watermark pause/resume

pub use topic_consumer::{Consumer, MessageStream};

mod fetcher;
mod flow_control;
mod topic_consumer;
