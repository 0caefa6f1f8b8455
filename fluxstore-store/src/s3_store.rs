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
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use fluxstore_config::S3ObjectStore as S3ObjectStoreConfig;
use fluxstore_error::{make_err, Code, Error, ResultExt};
use fluxstore_util::buf_channel::BufChannelReader;
use uuid::Uuid;

use crate::object_store::{ObjectReadStream, ObjectStore, UploadSizeInfo};

/// Stores blobs in an S3-compatible bucket, keyed by `{key_prefix}{id}`.
///
/// Uploads are buffered fully into memory before the put (spec section
/// 4.4.1's "strategy-(a)"): the S3 API needs a known content length for a
/// single-shot `PutObject`, and a proper multipart streaming upload is out
/// of scope for this backend. This is safe because an upstream size limit
/// is expected to be enforced ahead of this store, per spec's own caveat on
/// strategy-(a) memory bounds.
pub struct S3Store {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    pub async fn new(config: &S3ObjectStoreConfig) -> Result<Self, Error> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared_config = loader.load().await;
        let client = Client::new(&shared_config);
        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Constructs a client from pre-resolved credentials, bypassing the
    /// ambient credential chain. Used by tests against a local S3-compatible
    /// endpoint (eg minio) where `defaults()` would otherwise try to reach
    /// the real AWS metadata service.
    pub fn from_client(client: Client, bucket: String, key_prefix: String) -> Self {
        Self { client, bucket, key_prefix }
    }

    pub fn with_static_credentials(
        config: &S3ObjectStoreConfig,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Self {
        let creds = Credentials::new(access_key_id, secret_access_key, None, None, "fluxstore-static");
        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region.clone()))
            .credentials_provider(creds)
            .force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        let client = Client::from_conf(builder.build());
        Self::from_client(client, config.bucket.clone(), config.key_prefix.clone())
    }

    fn key(&self, id: Uuid) -> String {
        format!("{}{id}", self.key_prefix)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, id: Uuid, reader: BufChannelReader, _size_info: UploadSizeInfo) -> Result<(), Error> {
        let body = reader.collect().await.err_tip(|| "While buffering upload body for S3 put")?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(id))
            .body(ByteStream::from(body))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| make_err!(Code::Unavailable, "S3 put_object failed: {e}"))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ObjectReadStream, Error> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(id))
            .send()
            .await;
        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(e)) if matches!(e.err(), GetObjectError::NoSuchKey(_)) => {
                return Err(make_err!(Code::NotFound, "No object with id {id}"));
            }
            Err(e) => return Err(make_err!(Code::Unavailable, "S3 get_object failed: {e}")),
        };
        Ok(Box::pin(output.body.into_async_read()))
    }
}
