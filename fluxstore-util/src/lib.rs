// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod buf_channel;
pub mod retry;

/// Spawns a future on the tokio runtime under a named tracing span, the same
/// shape as the teacher's `spawn!` helper: every background task gets a name
/// that shows up in logs instead of an anonymous `JoinHandle`.
#[macro_export]
macro_rules! spawn {
    ($name:expr, $fut:expr) => {
        tokio::spawn(tracing::Instrument::instrument(
            $fut,
            tracing::info_span!($name),
        ))
    };
}
