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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxstore_error::Error;
use uuid::Uuid;

/// A file record's lifecycle state. There is no explicit `Failed` state:
/// failed uploads are erased by compensating delete (spec invariant F1/F2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Success,
}

/// A catalog entry as returned by `list_files_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The narrow interface the coordinator consumes for file metadata. Mirrors
/// the meta-store contract of spec section 6; the coordinator is the only
/// writer of records reached through this trait.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Inserts a new record with status `pending`. Must fail if `id`
    /// already exists (it never should, since `id` is freshly minted).
    async fn save_file_info(
        &self,
        id: Uuid,
        name: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// Promotes a record's status to `success`. Must report an error if no
    /// row was affected (the record is expected to exist at this point).
    async fn set_success_status(&self, id: Uuid) -> Result<(), Error>;

    /// Removes a record, used for upload-failure compensation.
    async fn delete_file_info(&self, id: Uuid) -> Result<(), Error>;

    /// Looks up a record's display name. Returns a `NotFound`-coded error
    /// if the record is absent.
    async fn get_file_name(&self, id: Uuid) -> Result<String, Error>;

    /// Returns `success`-status records ordered newest-first, paginated.
    async fn list_files_info(&self, limit: i64, offset: i64) -> Result<Vec<FileInfo>, Error>;
}
