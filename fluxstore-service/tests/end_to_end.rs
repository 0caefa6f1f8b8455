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

//! Exercises the regulator (C1-C3) and the coordinator (C4-C5) together,
//! without a live gRPC transport: a client's limiter governs how many of
//! its uploads may run concurrently, and completed uploads become visible
//! through `list`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fluxstore_service::coordinator::{CoordinatorConfig, FileCoordinator};
use fluxstore_service::registry::LimiterRegistry;
use fluxstore_store::{MemoryMetaStore, MemoryObjectStore};
use fluxstore_util::buf_channel::make_buf_channel_pair;

fn coordinator() -> FileCoordinator {
    FileCoordinator::new(
        Arc::new(MemoryObjectStore::new()),
        Arc::new(MemoryMetaStore::new()),
        CoordinatorConfig {
            operation_timeout: Duration::from_secs(5),
            buf_size: 4096,
            max_limit: 1000,
            default_limit: 100,
            max_offset: 1_000_000,
            default_offset: 0,
            max_retries: 2,
            base_backoff: Duration::from_millis(1),
        },
    )
}

#[tokio::test]
async fn client_bulk_cap_rejects_the_third_concurrent_upload() {
    let registry = LimiterRegistry::new(2, 2, Duration::from_secs(60), 100);
    let limiter = registry.get("client-a").unwrap();

    assert!(limiter.try_acquire_bulk());
    assert!(limiter.try_acquire_bulk());
    assert!(!limiter.try_acquire_bulk(), "third concurrent upload should be rejected");

    limiter.release_bulk();
    assert!(limiter.try_acquire_bulk(), "releasing a slot admits the next call");
    registry.close();
}

#[tokio::test]
async fn upload_becomes_visible_in_list_only_after_it_succeeds() {
    let coordinator = coordinator();
    let deadline = coordinator.operation_deadline(None);

    assert_eq!(coordinator.list(10, 0, deadline).await.unwrap().len(), 0);

    let (mut tx, rx) = make_buf_channel_pair();
    tokio::spawn(async move {
        tx.send(Bytes::from_static(b"contents")).await.unwrap();
        tx.send_eof();
    });
    coordinator.upload("report.pdf", rx, deadline).await.unwrap();

    let files = coordinator.list(10, 0, deadline).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "report.pdf");
}

#[tokio::test]
async fn two_clients_have_independent_limiters() {
    let registry = LimiterRegistry::new(1, 1, Duration::from_secs(60), 100);
    let a = registry.get("client-a").unwrap();
    let b = registry.get("client-b").unwrap();

    assert!(a.try_acquire_bulk());
    assert!(!a.try_acquire_bulk());
    // client-b's pool is untouched by client-a's exhaustion.
    assert!(b.try_acquire_bulk());
    registry.close();
}
