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

//! Dual-store coordinator (C4): implements Upload, Download, List as sagas
//! across the object store and the meta store, calling through the
//! retrying driver wrappers (C5) for every store call.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fluxstore_error::{error_if, make_err, Code, Error, ResultExt};
use fluxstore_store::{FileInfo, MetaStore, ObjectReadStream, ObjectStore, UploadSizeInfo};
use fluxstore_util::buf_channel::{make_buf_channel_pair, BufChannelReader};
use fluxstore_util::retry::{with_retry_cancellable, RetryResult};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub operation_timeout: Duration,
    pub buf_size: usize,
    pub max_limit: i64,
    pub default_limit: i64,
    pub max_offset: i64,
    pub default_offset: i64,
    pub max_retries: usize,
    pub base_backoff: Duration,
}

impl From<&fluxstore_config::CoordinatorConfig> for CoordinatorConfig {
    fn from(cfg: &fluxstore_config::CoordinatorConfig) -> Self {
        Self {
            operation_timeout: cfg.operation_timeout,
            buf_size: cfg.buf_size,
            max_limit: cfg.max_limit,
            default_limit: cfg.default_limit,
            max_offset: cfg.max_offset,
            default_offset: cfg.default_offset,
            max_retries: cfg.max_retries,
            base_backoff: cfg.base_backoff,
        }
    }
}

pub struct FileCoordinator {
    object_store: Arc<dyn ObjectStore>,
    meta_store: Arc<dyn MetaStore>,
    config: CoordinatorConfig,
}

/// The result of a successful [`FileCoordinator::download`] resolution: the
/// display name (sent as the response's header message) plus a stream to
/// pump into the body messages.
pub struct DownloadHandle {
    pub file_name: String,
    pub reader: ObjectReadStream,
}

impl FileCoordinator {
    pub fn new(object_store: Arc<dyn ObjectStore>, meta_store: Arc<dyn MetaStore>, config: CoordinatorConfig) -> Self {
        Self {
            object_store,
            meta_store,
            config,
        }
    }

    /// Derives the operation-scoped deadline: the tighter of "now plus the
    /// configured operation_timeout" and an optional inbound call deadline.
    pub fn operation_deadline(&self, inbound_deadline: Option<Instant>) -> Instant {
        let configured = Instant::now() + self.config.operation_timeout;
        match inbound_deadline {
            Some(inbound) => configured.min(inbound),
            None => configured,
        }
    }

    fn cancelled_at(&self, deadline: Instant) -> impl Future<Output = ()> + Unpin {
        Box::pin(tokio::time::sleep_until(deadline.into()))
    }

    /// Runs a store call through the retry wrapper, classifying `NotFound`,
    /// `InvalidArgument`, `AlreadyExists`, and `FailedPrecondition` as
    /// non-retryable user-fault/schema errors (spec section 4.5) and
    /// everything else as transient.
    async fn with_store_retry<T, F, Fut>(&self, deadline: Instant, mut attempt: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        with_retry_cancellable(
            self.config.max_retries,
            self.config.base_backoff,
            move || {
                let fut = attempt();
                async move {
                    match fut.await {
                        Ok(value) => RetryResult::Ok(value),
                        Err(err)
                            if matches!(
                                err.code,
                                Code::NotFound | Code::InvalidArgument | Code::AlreadyExists | Code::FailedPrecondition
                            ) =>
                        {
                            RetryResult::Err(err)
                        }
                        Err(err) => RetryResult::Retry(err),
                    }
                }
            },
            self.cancelled_at(deadline),
        )
        .await
    }

    /// Upload saga: AWAIT_HEADER (validated by the caller) -> BUFFERING
    /// (streamed in via `body`) -> META_INSERT -> OBJECT_PUT -> META_PROMOTE.
    /// On an `OBJECT_PUT` failure the pending meta record is compensated
    /// away (best-effort; its own failure is logged, never surfaced).
    ///
    /// The body is buffered fully before `OBJECT_PUT` (the same strategy-(a)
    /// tradeoff `S3Store::put` makes internally) rather than streamed once:
    /// a `BufChannelReader` is single-consumption, so routing a true
    /// streaming put through the retry wrapper's repeated-attempt contract
    /// is not possible without buffering. Buffering here lets a transient
    /// put failure retry like every other store call (spec section 4.5).
    pub async fn upload(&self, file_name: &str, body: BufChannelReader, deadline: Instant) -> Result<Uuid, Error> {
        error_if!(file_name.is_empty(), "file_name is required");

        let id = Uuid::new_v4();
        let now = Utc::now();

        self.with_store_retry(deadline, || {
            let meta_store = self.meta_store.clone();
            let name = file_name.to_string();
            async move { meta_store.save_file_info(id, &name, now, now).await }
        })
        .await
        .err_tip(|| "While inserting pending file record")?;

        let contents = body.collect().await.err_tip(|| "While buffering upload body for a retryable put")?;

        let put_result = self
            .with_store_retry(deadline, || {
                let object_store = self.object_store.clone();
                let contents = contents.clone();
                async move {
                    let (mut writer, reader) = make_buf_channel_pair();
                    let len = contents.len();
                    tokio::spawn(async move {
                        if len > 0 {
                            let _ = writer.send(contents).await;
                        }
                        writer.send_eof();
                    });
                    object_store.put(id, reader, UploadSizeInfo::ExactSize(len as u64)).await
                }
            })
            .await;

        if let Err(put_err) = put_result {
            tracing::error!(file_id = %id, error = %put_err, "Object store put failed after exhausting retries");
            if let Err(compensation_err) = self.meta_store.delete_file_info(id).await {
                tracing::error!(
                    file_id = %id,
                    error = %compensation_err,
                    "Compensating delete failed after object-store put failure; pending row is now an orphan for the out-of-band reaper"
                );
            }
            return Err(make_err!(Code::Internal, "Failed to store file contents for {id}"));
        }

        self.with_store_retry(deadline, || {
            let meta_store = self.meta_store.clone();
            async move { meta_store.set_success_status(id).await }
        })
        .await
        .err_tip(|| "While promoting file record to success; object was written, orphan record permitted")?;

        Ok(id)
    }

    /// Download: the object store resolves first (it is the authoritative
    /// presence signal — an object without a meta row is pathological but
    /// still unservable), then the meta store's display name.
    pub async fn download(&self, file_id: &str, deadline: Instant) -> Result<DownloadHandle, Error> {
        error_if!(file_id.is_empty(), "file id is required");
        let id = Uuid::parse_str(file_id).map_err(|e| make_err!(Code::InvalidArgument, "file id is not a valid identifier: {e}"))?;

        let reader = self
            .with_store_retry(deadline, || {
                let object_store = self.object_store.clone();
                async move { object_store.get(id).await }
            })
            .await
            .err_tip(|| format!("While opening object stream for {id}"))?;

        let file_name = self
            .with_store_retry(deadline, || {
                let meta_store = self.meta_store.clone();
                async move { meta_store.get_file_name(id).await }
            })
            .await
            .err_tip(|| format!("While resolving file name for {id}"))?;

        Ok(DownloadHandle { file_name, reader })
    }

    /// List: validates and substitutes pagination parameters, then queries
    /// the meta store. Ordering and status-filtering are the meta store's
    /// responsibility (spec's open question 1 resolves to "success only").
    pub async fn list(&self, limit: i64, offset: i64, deadline: Instant) -> Result<Vec<FileInfo>, Error> {
        error_if!(limit < 0, "limit must not be negative");
        error_if!(offset < 0, "offset must not be negative");
        error_if!(limit > self.config.max_limit, "limit {limit} exceeds max_limit {}", self.config.max_limit);
        error_if!(offset > self.config.max_offset, "offset {offset} exceeds max_offset {}", self.config.max_offset);

        let limit = if limit == 0 { self.config.default_limit } else { limit };
        let offset = if offset == 0 { self.config.default_offset } else { offset };

        self.with_store_retry(deadline, || {
            let meta_store = self.meta_store.clone();
            async move { meta_store.list_files_info(limit, offset).await }
        })
        .await
        .err_tip(|| "While listing files")
    }

    pub fn buf_size(&self) -> usize {
        self.config.buf_size
    }
}
