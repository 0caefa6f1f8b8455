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

//! The two abstract interfaces the dual-store coordinator (C4) consumes,
//! plus in-memory fakes and production backends for each.

pub mod memory_meta_store;
pub mod memory_object_store;
pub mod meta_store;
pub mod object_store;
pub mod postgres_meta_store;
pub mod s3_store;

pub use memory_meta_store::MemoryMetaStore;
pub use memory_object_store::MemoryObjectStore;
pub use meta_store::{FileInfo, FileStatus, MetaStore};
pub use object_store::{ObjectReadStream, ObjectStore, UploadSizeInfo};
pub use postgres_meta_store::PostgresMetaStore;
pub use s3_store::S3Store;

use std::sync::Arc;

use fluxstore_config::{MetaStoreConfig, ObjectStoreConfig};
use fluxstore_error::Error;

/// Builds the configured object-store backend.
pub async fn build_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>, Error> {
    match config {
        ObjectStoreConfig::Memory => Ok(Arc::new(MemoryObjectStore::new())),
        ObjectStoreConfig::S3(s3_config) => Ok(Arc::new(S3Store::new(s3_config).await?)),
    }
}

/// Builds the configured meta-store backend.
pub async fn build_meta_store(config: &MetaStoreConfig) -> Result<Arc<dyn MetaStore>, Error> {
    match config {
        MetaStoreConfig::Memory => Ok(Arc::new(MemoryMetaStore::new())),
        MetaStoreConfig::Postgres(pg_config) => Ok(Arc::new(PostgresMetaStore::new(pg_config).await?)),
    }
}
