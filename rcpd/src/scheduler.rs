//! Periodic jobs: health polling and snapshot capture/prune, run on cron
//! schedules against every device currently in the store.

use std::sync::Arc;

use rcp_common::domain::device::DeviceStatus;
use rcp_core::health::HealthService;
use rcp_core::snapshot::SnapshotPipeline;
use rcp_core::store::Store;
use rcp_transport::broker::{CredentialSource, TransportFactory};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub async fn start<S, F>(store: Store, health: Arc<HealthService<S, F>>, snapshots: Arc<SnapshotPipeline<S, F>>, health_poll_cron: &str, snapshot_cron: &str, snapshot_retention: usize) -> anyhow::Result<JobScheduler>
where
    S: CredentialSource + 'static,
    F: TransportFactory + 'static,
{
    let scheduler = JobScheduler::new().await?;

    let health_store = store.clone();
    let health_service = health.clone();
    scheduler
        .add(Job::new_async(health_poll_cron, move |_uuid, _lock| {
            let store = health_store.clone();
            let health_service = health_service.clone();
            Box::pin(async move {
                let devices = store.list_devices().await;
                for device in devices.iter().filter(|d| d.status != DeviceStatus::Decommissioned) {
                    let result = health_service.run_health_check(&device.id).await;
                    info!(device_id = %device.id, status = ?result.status, "periodic health check");
                }
            })
        })?)
        .await?;

    let snapshot_store = store.clone();
    let snapshot_pipeline = snapshots.clone();
    scheduler
        .add(Job::new_async(snapshot_cron, move |_uuid, _lock| {
            let store = snapshot_store.clone();
            let pipeline = snapshot_pipeline.clone();
            Box::pin(async move {
                let devices: Vec<_> = store.list_devices().await.into_iter().filter(|d| d.status != DeviceStatus::Decommissioned && d.status != DeviceStatus::Unreachable).collect();
                let captured = pipeline.capture_all_eligible(&devices, "config", true).await;
                let pruned = pipeline.prune_all(&devices, "config", snapshot_retention).await;
                info!(captured, pruned, "periodic snapshot sweep");
            })
        })?)
        .await?;

    if let Err(err) = scheduler.start().await {
        warn!(%err, "scheduler failed to start");
    }

    Ok(scheduler)
}
