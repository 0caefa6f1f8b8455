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

//! Wires the generated `FileService` trait to the [`crate::coordinator::FileCoordinator`]:
//! streaming discipline (header-then-chunks) lives here, saga logic does not.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use fluxstore_proto::file_service_server::FileService;
use fluxstore_proto::{
    FileInfo as WireFileInfo, GetFileRequest, GetFileResponse, ListFilesRequest, ListFilesResponse, UploadFileRequest,
    UploadFileResponse,
};
use fluxstore_util::buf_channel::make_buf_channel_pair;
use tokio::io::AsyncReadExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};

use crate::coordinator::FileCoordinator;

pub struct FluxstoreFileService {
    coordinator: Arc<FileCoordinator>,
}

impl FluxstoreFileService {
    pub fn new(coordinator: Arc<FileCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Reads the `grpc-timeout` metadata value a well-behaved client sends with
/// every call and turns it into an absolute deadline, so the coordinator can
/// take the tighter of it and `operation_timeout` (spec section 4.4/5).
/// Absent or unparseable timeouts fall back to `None`, leaving
/// `operation_timeout` as the only bound.
fn inbound_deadline<T>(request: &Request<T>) -> Option<Instant> {
    let raw = request.metadata().get("grpc-timeout")?.to_str().ok()?;
    parse_grpc_timeout(raw).map(|timeout| Instant::now() + timeout)
}

/// Parses the gRPC-over-HTTP2 `grpc-timeout` header: 1-8 ASCII digits
/// followed by a unit (`H`/`M`/`S`/`m`/`u`/`n`), per the wire protocol.
fn parse_grpc_timeout(raw: &str) -> Option<Duration> {
    if raw.is_empty() || raw.len() > 9 {
        return None;
    }
    let split_at = raw.len().checked_sub(1)?;
    let (digits, unit) = raw.split_at(split_at);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}

/// Drains an inbound upload stream into the coordinator: the first message
/// supplies `file_name` (and may also carry the first chunk), every message
/// after it carries only a chunk. Generic over the stream type so tests can
/// drive it with a plain `tokio_stream::iter` instead of a real `Streaming`.
async fn run_upload(
    coordinator: &FileCoordinator,
    mut inbound: impl Stream<Item = Result<UploadFileRequest, Status>> + Unpin + Send + 'static,
    inbound_deadline: Option<Instant>,
) -> Result<UploadFileResponse, Status> {
    let first = inbound
        .next()
        .await
        .transpose()?
        .ok_or_else(|| Status::invalid_argument("upload stream closed before the header message"))?;
    if first.file_name.is_empty() {
        return Err(Status::invalid_argument("first upload message must carry file_name"));
    }
    let file_name = first.file_name.clone();

    let (mut writer, reader) = make_buf_channel_pair();
    fluxstore_util::spawn!("upload_drain", async move {
        if !first.chunk.is_empty() && writer.send(first.chunk.into()).await.is_err() {
            return;
        }
        loop {
            match inbound.next().await {
                Some(Ok(msg)) => {
                    if msg.chunk.is_empty() {
                        continue;
                    }
                    if writer.send(msg.chunk.into()).await.is_err() {
                        return;
                    }
                }
                Some(Err(status)) => {
                    writer.send_error(status.into()).await;
                    return;
                }
                None => {
                    writer.send_eof();
                    return;
                }
            }
        }
    });

    let deadline = coordinator.operation_deadline(inbound_deadline);
    let id = coordinator.upload(&file_name, reader, deadline).await?;
    Ok(UploadFileResponse { file_id: id.to_string() })
}

#[tonic::async_trait]
impl FileService for FluxstoreFileService {
    async fn upload_file(&self, request: Request<Streaming<UploadFileRequest>>) -> Result<Response<UploadFileResponse>, Status> {
        let deadline = inbound_deadline(&request);
        let response = run_upload(&self.coordinator, request.into_inner(), deadline).await?;
        Ok(Response::new(response))
    }

    type GetFileStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<GetFileResponse, Status>> + Send + 'static>>;

    async fn get_file(&self, request: Request<GetFileRequest>) -> Result<Response<Self::GetFileStream>, Status> {
        let inbound_deadline = inbound_deadline(&request);
        let file_id = request.into_inner().file_id;
        let deadline = self.coordinator.operation_deadline(inbound_deadline);
        let handle = self.coordinator.download(&file_id, deadline).await?;
        let buf_size = self.coordinator.buf_size();

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        fluxstore_util::spawn!("download_stream", async move {
            if tx
                .send(Ok(GetFileResponse {
                    file_name: handle.file_name,
                    chunk: Vec::new(),
                }))
                .await
                .is_err()
            {
                return;
            }

            let mut reader = handle.reader;
            let mut buf = BytesMut::zeroed(buf_size);
            let sleep = tokio::time::sleep_until(deadline.into());
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut sleep => {
                        let _ = tx.send(Err(Status::deadline_exceeded("operation deadline exceeded while streaming file"))).await;
                        return;
                    }
                    result = reader.read(&mut buf) => {
                        match result {
                            Ok(0) => return,
                            Ok(n) => {
                                let chunk = buf[..n].to_vec();
                                if tx
                                    .send(Ok(GetFileResponse {
                                        file_name: String::new(),
                                        chunk,
                                    }))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Err(err) => {
                                let _ = tx.send(Err(Status::unavailable(format!("object read failed: {err}")))).await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn list_files(&self, request: Request<ListFilesRequest>) -> Result<Response<ListFilesResponse>, Status> {
        let inbound_deadline = inbound_deadline(&request);
        let req = request.into_inner();
        let deadline = self.coordinator.operation_deadline(inbound_deadline);
        let files = self.coordinator.list(req.limit, req.offset, deadline).await?;
        Ok(Response::new(ListFilesResponse {
            files: files
                .into_iter()
                .map(|f| WireFileInfo {
                    name: f.name,
                    created_at_unix_millis: f.created_at.timestamp_millis(),
                    updated_at_unix_millis: f.updated_at.timestamp_millis(),
                })
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use fluxstore_store::{MemoryMetaStore, MemoryObjectStore};
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    fn test_service() -> FluxstoreFileService {
        let coordinator = FileCoordinator::new(
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryMetaStore::new()),
            CoordinatorConfig {
                operation_timeout: Duration::from_secs(5),
                buf_size: 8,
                max_limit: 1000,
                default_limit: 100,
                max_offset: 1_000_000,
                default_offset: 0,
                max_retries: 2,
                base_backoff: Duration::from_millis(1),
            },
        );
        FluxstoreFileService::new(Arc::new(coordinator))
    }

    fn upload_stream_of(messages: Vec<UploadFileRequest>) -> impl Stream<Item = Result<UploadFileRequest, Status>> + Unpin + Send + 'static {
        tokio_stream::iter(messages.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn upload_then_get_round_trips_through_the_wire_types() {
        let service = test_service();

        let messages = vec![
            UploadFileRequest {
                file_name: "report.pdf".to_string(),
                chunk: b"hello ".to_vec(),
            },
            UploadFileRequest {
                file_name: String::new(),
                chunk: b"world".to_vec(),
            },
        ];
        let response = run_upload(&service.coordinator, upload_stream_of(messages), None).await.unwrap();
        assert!(!response.file_id.is_empty());

        let get_request = Request::new(GetFileRequest { file_id: response.file_id });
        let mut stream = service.get_file(get_request).await.unwrap().into_inner();

        let header = stream.next().await.unwrap().unwrap();
        assert_eq!(header.file_name, "report.pdf");
        assert!(header.chunk.is_empty());

        let mut collected = Vec::new();
        while let Some(msg) = stream.next().await {
            collected.extend_from_slice(&msg.unwrap().chunk);
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn upload_without_file_name_on_first_message_is_rejected() {
        let service = test_service();
        let messages = vec![UploadFileRequest {
            file_name: String::new(),
            chunk: b"x".to_vec(),
        }];
        let status = run_upload(&service.coordinator, upload_stream_of(messages), None).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn get_unknown_file_is_not_found() {
        let service = test_service();
        let request = Request::new(GetFileRequest {
            file_id: uuid::Uuid::new_v4().to_string(),
        });
        let status = service.get_file(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }
}
