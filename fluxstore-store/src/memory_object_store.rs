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

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use fluxstore_error::{make_err, Code, Error};
use fluxstore_util::buf_channel::BufChannelReader;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::object_store::{ObjectReadStream, ObjectStore, UploadSizeInfo};

/// Keeps every blob in a hashmap in process memory. Used in tests and
/// single-node deployments that don't need durability across restarts.
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: Mutex<HashMap<Uuid, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault-injection hook for the compensation test scenario: every
    /// subsequent `put` call for this store fails with a transient error.
    pub fn fail_next_puts(self: &std::sync::Arc<Self>) -> FaultInjectedObjectStore {
        FaultInjectedObjectStore {
            inner: self.clone(),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: Uuid) -> bool {
        self.blobs.lock().contains_key(&id)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, id: Uuid, mut reader: BufChannelReader, _size_info: UploadSizeInfo) -> Result<(), Error> {
        let bytes = {
            let mut buf = Vec::new();
            while let Some(chunk) = reader.recv().await? {
                buf.extend_from_slice(&chunk);
            }
            Bytes::from(buf)
        };
        self.blobs.lock().insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ObjectReadStream, Error> {
        let bytes = self
            .blobs
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "No object with id {id}"))?;
        Ok(Box::pin(Cursor::new(bytes)))
    }
}

/// Wraps a [`MemoryObjectStore`] so every `put` fails with a transient
/// `Unavailable` error, used to exercise the compensating-delete path
/// (spec section 8, scenario 2) without a real flaky backend.
pub struct FaultInjectedObjectStore {
    inner: std::sync::Arc<MemoryObjectStore>,
}

#[async_trait]
impl ObjectStore for FaultInjectedObjectStore {
    async fn put(&self, _id: Uuid, _reader: BufChannelReader, _size_info: UploadSizeInfo) -> Result<(), Error> {
        Err(make_err!(Code::Unavailable, "Injected fault: object store unreachable"))
    }

    async fn get(&self, id: Uuid) -> Result<ObjectReadStream, Error> {
        self.inner.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as B;
    use fluxstore_util::buf_channel::make_buf_channel_pair;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn round_trips_bytes() {
        let store = MemoryObjectStore::new();
        let id = Uuid::new_v4();
        let (mut tx, rx) = make_buf_channel_pair();
        tokio::spawn(async move {
            tx.send(B::from_static(b"cat.jpg bytes")).await.unwrap();
            tx.send_eof();
        });
        store.put(id, rx, UploadSizeInfo::Unknown).await.unwrap();

        let mut stream = store.get(id).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"cat.jpg bytes");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
    }
}
