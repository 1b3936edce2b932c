//! Snapshot Pipeline: capture, retrieve, prune and decode device
//! configuration snapshots. REST is tried first; shell export is the
//! fallback and always marks the result `redacted=true`.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use rcp_common::domain::device::{Device, DeviceId, DeviceStatus, Environment};
use rcp_common::domain::snapshot::{Snapshot, SnapshotId, SnapshotMeta, SnapshotSource};
use rcp_common::error::{CoreError, CoreResult, ErrorCode};
use rcp_common::ids::new_snapshot_id;
use rcp_transport::broker::{Broker, CredentialSource, TransportFactory};

use crate::metrics;
use crate::store::Store;

pub struct SnapshotPipeline<S: CredentialSource, F: TransportFactory> {
    store: Store,
    broker: Arc<Broker<S, F>>,
    max_size_bytes: u64,
    compression_level: u32,
    capture_semaphore: Arc<Semaphore>,
    service_environment: Environment,
}

impl<S: CredentialSource, F: TransportFactory> SnapshotPipeline<S, F> {
    pub fn new(
        store: Store,
        broker: Arc<Broker<S, F>>,
        max_size_bytes: u64,
        compression_level: u32,
        capture_concurrency: usize,
        service_environment: Environment,
    ) -> Self {
        Self {
            store,
            broker,
            max_size_bytes,
            compression_level,
            capture_semaphore: Arc::new(Semaphore::new(capture_concurrency.max(1))),
            service_environment,
        }
    }

    pub async fn capture(&self, device: &Device, kind: &str, allow_shell_fallback: bool) -> CoreResult<SnapshotId> {
        let _permit = self.capture_semaphore.acquire().await.expect("capture semaphore never closes");
        let start = std::time::Instant::now();

        let (text, source) = self.capture_text(&device.id, allow_shell_fallback).await.inspect_err(|_| {
            metrics::SNAPSHOT_CAPTURE_TOTAL.with_label_values(&[device.id.as_str(), kind, "none", "failed"]).inc();
        })?;

        if text.len() as u64 > self.max_size_bytes {
            metrics::SNAPSHOT_CAPTURE_TOTAL
                .with_label_values(&[device.id.as_str(), kind, source.as_label(), "rejected"])
                .inc();
            return Err(CoreError::new(
                ErrorCode::Validation,
                format!("snapshot exceeds max size of {} bytes", self.max_size_bytes),
            ));
        }

        let checksum = hex::encode(Sha256::digest(text.as_bytes()));
        let compressed = gzip_compress(text.as_bytes(), self.compression_level);
        let uncompressed_size = text.len() as u64;
        let compressed_size = compressed.len() as u64;

        let snapshot = Snapshot {
            id: SnapshotId::new(new_snapshot_id(Utc::now())),
            device_id: device.id.clone(),
            kind: kind.to_string(),
            timestamp: Utc::now(),
            compressed,
            meta: SnapshotMeta {
                uncompressed_size,
                compressed_size,
                compression: "gzip".to_string(),
                compression_level: self.compression_level,
                checksum,
                checksum_algorithm: "sha256".to_string(),
                source,
                redacted: matches!(source, SnapshotSource::Shell),
            },
        };
        let id = snapshot.id.clone();
        self.store.put_snapshot(snapshot).await;
        self.store.mark_last_seen(&device.id, Utc::now()).await;

        let duration = start.elapsed().as_secs_f64();
        let label_source = source.as_label();
        metrics::SNAPSHOT_CAPTURE_TOTAL.with_label_values(&[device.id.as_str(), kind, label_source, "success"]).inc();
        metrics::SNAPSHOT_CAPTURE_DURATION_SECONDS
            .with_label_values(&[device.id.as_str(), kind, label_source])
            .observe(duration);
        metrics::SNAPSHOT_SIZE_BYTES.with_label_values(&[device.id.as_str(), kind]).observe(uncompressed_size as f64);
        if uncompressed_size > 0 {
            metrics::SNAPSHOT_COMPRESSION_RATIO
                .with_label_values(&[device.id.as_str(), kind])
                .observe(compressed_size as f64 / uncompressed_size as f64);
        }
        metrics::SNAPSHOT_AGE_SECONDS.with_label_values(&[device.id.as_str(), kind]).set(0.0);

        Ok(id)
    }

    async fn capture_text(&self, device_id: &DeviceId, allow_shell_fallback: bool) -> CoreResult<(String, SnapshotSource)> {
        // RouterOS v7 REST has no config-export endpoint; shell is the only
        // real path today, but the REST attempt is kept first so a future
        // firmware that adds one is picked up without a code change.
        if let Ok(client) = self.broker.get_rest_client(device_id).await {
            if self.broker.call(client.get_system_identity()).await.is_ok() {
                // No REST export endpoint exists yet; fall through to shell.
            }
        }

        if !allow_shell_fallback {
            return Err(CoreError::new(ErrorCode::DeviceUnreachable, "REST export unavailable and shell fallback disabled"));
        }

        let shell = self
            .broker
            .get_shell_client(device_id)
            .await
            .map_err(|e| CoreError::new(ErrorCode::DeviceUnreachable, e.to_string()))?;
        let text = self
            .broker
            .call(shell.export_hide_sensitive_compact())
            .await
            .map_err(|e| CoreError::new(ErrorCode::DeviceUnreachable, e.to_string()))?;
        Ok((text, SnapshotSource::Shell))
    }

    pub async fn get_latest(&self, device_id: &DeviceId, kind: &str) -> Option<Snapshot> {
        let items = self.store.list_snapshots(device_id, kind).await;
        match items.into_iter().next() {
            Some(snapshot) => {
                let age = (Utc::now() - snapshot.timestamp).num_seconds().max(0) as f64;
                metrics::SNAPSHOT_AGE_SECONDS.with_label_values(&[device_id.as_str(), kind]).set(age);
                Some(snapshot)
            }
            None => {
                metrics::SNAPSHOT_MISSING_TOTAL.with_label_values(&[device_id.as_str(), kind]).inc();
                None
            }
        }
    }

    pub async fn prune(&self, device_id: &DeviceId, kind: &str, keep_n: usize) -> usize {
        let items = self.store.list_snapshots(device_id, kind).await;
        if items.len() <= keep_n {
            return 0;
        }
        let to_delete: Vec<SnapshotId> = items.into_iter().skip(keep_n).map(|s| s.id).collect();
        self.store.delete_snapshots(device_id, kind, &to_delete).await
    }

    pub fn decode(&self, snapshot: &Snapshot) -> CoreResult<String> {
        let mut decoder = GzDecoder::new(&snapshot.compressed[..]);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| CoreError::new(ErrorCode::Validation, format!("failed to decode snapshot: {e}")))?;
        Ok(text)
    }

    /// Periodic job: captures for every eligible device, bounded by the
    /// capture semaphore. Eligible = not decommissioned, environment
    /// matches the service's own.
    pub async fn capture_all_eligible(&self, devices: &[Device], kind: &str, allow_shell_fallback: bool) -> usize {
        let mut captured = 0;
        for device in devices {
            if device.status == DeviceStatus::Decommissioned {
                continue;
            }
            if device.environment != self.service_environment {
                continue;
            }
            if self.capture(device, kind, allow_shell_fallback).await.is_ok() {
                captured += 1;
            }
        }
        captured
    }

    pub async fn prune_all(&self, devices: &[Device], kind: &str, keep_n: usize) -> usize {
        let mut total = 0;
        for device in devices {
            total += self.prune(&device.id, kind, keep_n).await;
        }
        total
    }
}

impl SnapshotSource {
    fn as_label(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Shell => "shell",
        }
    }
}

fn gzip_compress(data: &[u8], level: u32) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data).expect("compressing to an in-memory buffer cannot fail");
    encoder.finish().expect("compressing to an in-memory buffer cannot fail")
}
