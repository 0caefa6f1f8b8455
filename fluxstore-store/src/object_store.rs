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

use std::pin::Pin;

use async_trait::async_trait;
use fluxstore_error::Error;
use fluxstore_util::buf_channel::BufChannelReader;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Hints the size of an incoming object so a backend can choose a put
/// strategy (single-shot vs. multipart vs. streaming with chunked encoding).
#[derive(Debug, Clone, Copy)]
pub enum UploadSizeInfo {
    ExactSize(u64),
    Unknown,
}

pub type ObjectReadStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// The narrow interface the coordinator consumes for blob storage. Mirrors
/// the `put`/`get` contract of spec section 6; backends are free to
/// implement it against any actual object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams `reader` into the store under `id`. `size_info` may be
    /// `Unknown` for a true streaming put.
    async fn put(&self, id: Uuid, reader: BufChannelReader, size_info: UploadSizeInfo) -> Result<(), Error>;

    /// Opens a readable stream over the object stored under `id`. Returns a
    /// `NotFound`-coded error if no such object exists.
    async fn get(&self, id: Uuid) -> Result<ObjectReadStream, Error>;
}
