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

//! The concurrency regulator (C1-C3) and the dual-store coordinator (C4-C5)
//! wired into a tonic `FileService` implementation.

pub mod coordinator;
pub mod grpc_service;
pub mod interceptor;
pub mod limiter;
pub mod registry;

pub use coordinator::{CoordinatorConfig, DownloadHandle, FileCoordinator};
pub use grpc_service::FluxstoreFileService;
pub use interceptor::{classify_method, derive_client_id, ConcurrencyLayer, ConcurrencyService};
pub use limiter::{CallKind, ClientLimiter};
pub use registry::LimiterRegistry;
