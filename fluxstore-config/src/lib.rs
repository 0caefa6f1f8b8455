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

pub mod stores;

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use stores::{MetaStoreConfig, ObjectStoreConfig, PostgresMetaStore, S3ObjectStore};

/// Top level configuration for the fluxstore server, deserialized from a
/// JSON5 document. Every key listed in the external-interfaces section of
/// the specification has a field here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub limiter: LimiterConfig,
    pub coordinator: CoordinatorConfig,
    pub object_store: ObjectStoreConfig,
    pub meta_store: MetaStoreConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Address the gRPC server listens on, eg "0.0.0.0:50051".
    pub listen_address: String,
}

/// Per-client concurrency regulator settings (C1/C2).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LimiterConfig {
    /// Max concurrent Upload+Download calls per client identity.
    pub bulk_capacity: usize,

    /// Max concurrent List calls per client identity.
    pub list_capacity: usize,

    /// A limiter entry idle for longer than this, with zero occupancy, is
    /// eligible for eviction by the janitor.
    #[serde(with = "humantime_serde")]
    pub idle_ttl: Duration,

    /// Optional metadata header name used to derive client identity before
    /// falling back to forwarded-for / peer address / "unknown".
    #[serde(default)]
    pub client_id_metadata_key: Option<String>,

    /// Defensive cap on the number of distinct client identities tracked at
    /// once. Breaching it rejects new identities the same way an
    /// overflowing semaphore does.
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
}

fn default_max_tracked_clients() -> usize {
    100_000
}

/// Dual-store coordinator settings (C4/C5).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-call deadline cap, combined with the inbound call deadline
    /// (whichever is tighter wins).
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Download chunk size in bytes.
    #[serde(default = "default_buf_size")]
    pub buf_size: usize,

    pub max_limit: i64,
    pub default_limit: i64,
    pub max_offset: i64,
    #[serde(default)]
    pub default_offset: i64,

    pub max_retries: usize,
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
}

fn default_buf_size() -> usize {
    32 * 1024
}

/// Reads and parses a JSON5 configuration file. The path may use shell-style
/// `~`/`$VAR` expansion, matching the teacher's config loading convention.
pub fn load_from_file(path: &str) -> Result<Config, fluxstore_error::Error> {
    use fluxstore_error::{Code, ResultExt};

    let expanded = shellexpand::full(path)
        .map_err(|e| fluxstore_error::make_err!(Code::InvalidArgument, "Failed to expand config path: {e}"))?;
    let contents = fs::read_to_string(expanded.as_ref()).err_tip(|| format!("Failed to read config file '{expanded}'"))?;
    serde_json5::from_str(&contents).map_err(|e| fluxstore_error::make_err!(Code::InvalidArgument, "Failed to parse config file: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{
            server: { listen_address: "0.0.0.0:50051" },
            limiter: { bulk_capacity: 4, list_capacity: 16, idle_ttl: "10m" },
            coordinator: {
                operation_timeout: "30s",
                max_limit: 1000,
                default_limit: 100,
                max_offset: 1000000,
                max_retries: 3,
                base_backoff: "100ms",
            },
            object_store: { type: "memory" },
            meta_store: { type: "memory" },
        }"#;
        let cfg: Config = serde_json5::from_str(json).expect("should parse");
        assert_eq!(cfg.limiter.bulk_capacity, 4);
        assert_eq!(cfg.coordinator.buf_size, default_buf_size());
        assert_eq!(cfg.limiter.max_tracked_clients, default_max_tracked_clients());
    }
}
