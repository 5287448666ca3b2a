use crate::client::PredictionApi;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Up,
    Down(String),
}

impl ServiceStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, ServiceStatus::Up)
    }
}

pub async fn probe<A: PredictionApi + ?Sized>(api: &A) -> ServiceStatus {
    match api.status().await {
        Ok(()) => ServiceStatus::Up,
        Err(e) => ServiceStatus::Down(e.to_string()),
    }
}

/// Probes the service every `interval` and publishes the result. Only
/// changes are logged and sent to watchers.
pub fn spawn_status_poller<A>(api: Arc<A>, interval: Duration) -> (watch::Receiver<ServiceStatus>, JoinHandle<()>)
where
    A: PredictionApi + ?Sized + 'static,
{
    let (tx, rx) = watch::channel(ServiceStatus::Unknown);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let status = probe(api.as_ref()).await;
            let changed = tx.send_if_modified(|current| {
                if *current == status {
                    return false;
                }
                match &status {
                    ServiceStatus::Up => info!("Prediction service is up"),
                    ServiceStatus::Down(reason) => warn!("Prediction service is down: {}", reason),
                    ServiceStatus::Unknown => {}
                }
                *current = status;
                true
            });
            if !changed && tx.is_closed() {
                break;
            }
        }
    });
    (rx, handle)
}
