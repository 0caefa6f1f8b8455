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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxstore_error::{make_err, Code, Error};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::meta_store::{FileInfo, FileStatus, MetaStore};

struct Record {
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: FileStatus,
}

/// Keeps file records in a hashmap in process memory. Used in tests and
/// single-node deployments that don't need durability across restarts.
#[derive(Default)]
pub struct MemoryMetaStore {
    records: Mutex<HashMap<Uuid, Record>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn status_of(&self, id: Uuid) -> Option<FileStatus> {
        self.records.lock().get(&id).map(|r| r.status)
    }

    #[cfg(test)]
    pub fn contains(&self, id: Uuid) -> bool {
        self.records.lock().contains_key(&id)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn save_file_info(
        &self,
        id: Uuid,
        name: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut records = self.records.lock();
        if records.contains_key(&id) {
            return Err(make_err!(Code::AlreadyExists, "File record {id} already exists"));
        }
        records.insert(
            id,
            Record {
                name: name.to_string(),
                created_at,
                updated_at,
                status: FileStatus::Pending,
            },
        );
        Ok(())
    }

    async fn set_success_status(&self, id: Uuid) -> Result<(), Error> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| make_err!(Code::NotFound, "No pending file record {id} to promote"))?;
        record.status = FileStatus::Success;
        Ok(())
    }

    async fn delete_file_info(&self, id: Uuid) -> Result<(), Error> {
        self.records.lock().remove(&id);
        Ok(())
    }

    async fn get_file_name(&self, id: Uuid) -> Result<String, Error> {
        self.records
            .lock()
            .get(&id)
            .map(|r| r.name.clone())
            .ok_or_else(|| make_err!(Code::NotFound, "No file record {id}"))
    }

    async fn list_files_info(&self, limit: i64, offset: i64) -> Result<Vec<FileInfo>, Error> {
        let records = self.records.lock();
        let mut entries: Vec<&Record> = records
            .values()
            .filter(|r| r.status == FileStatus::Success)
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|r| FileInfo {
                name: r.name.clone(),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn pending_records_are_hidden_from_list() {
        let store = MemoryMetaStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        store.save_file_info(id, "a.txt", now, now).await.unwrap();
        assert_eq!(store.list_files_info(10, 0).await.unwrap().len(), 0);
        store.set_success_status(id).await.unwrap();
        assert_eq!(store.list_files_info(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_paginated_newest_first() {
        let store = MemoryMetaStore::new();
        let base = Utc::now();
        for i in 0..5i64 {
            let id = Uuid::new_v4();
            let ts = base + chrono::Duration::seconds(i);
            store.save_file_info(id, &format!("f{i}"), ts, ts).await.unwrap();
            store.set_success_status(id).await.unwrap();
        }
        let page1 = store.list_files_info(2, 0).await.unwrap();
        assert_eq!(page1.iter().map(|f| f.name.clone()).collect::<Vec<_>>(), vec!["f4", "f3"]);
        let page2 = store.list_files_info(2, 2).await.unwrap();
        assert_eq!(page2.iter().map(|f| f.name.clone()).collect::<Vec<_>>(), vec!["f2", "f1"]);
        let page3 = store.list_files_info(2, 4).await.unwrap();
        assert_eq!(page3.iter().map(|f| f.name.clone()).collect::<Vec<_>>(), vec!["f0"]);
    }

    #[tokio::test]
    async fn promoting_missing_record_is_an_error() {
        let store = MemoryMetaStore::new();
        let err = store.set_success_status(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
    }
}
