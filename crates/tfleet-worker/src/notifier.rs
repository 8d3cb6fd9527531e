//! Job lifecycle notifications.
//!
//! Jobs with a notification URL get a JSON `POST` per event; all other jobs
//! publish to the event bus. Delivery is best-effort: failures are logged and
//! never change the outcome of the job.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use tfleet_models::{Job, JobEvent, Notification, Params};
use tfleet_queue::EventBus;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bus: Arc<dyn EventBus>,
    namespace: String,
    legacy_completion_event: bool,
}

impl Notifier {
    pub fn new(http: reqwest::Client, bus: Arc<dyn EventBus>, namespace: impl Into<String>) -> Self {
        Self {
            http,
            bus,
            namespace: namespace.into(),
            legacy_completion_event: true,
        }
    }

    /// Also publish `completed` on the bus as `<ns>_completed`.
    pub fn with_legacy_completion_event(mut self, enabled: bool) -> Self {
        self.legacy_completion_event = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Send `event` for `job` with `data` merged into the payload.
    pub async fn notify(&self, job: &Job, event: JobEvent, data: Params) {
        match job.notification_url() {
            Some(url) => {
                let notification = Notification::for_job(job, &self.namespace, event, data);
                self.post(url, &notification).await;
            }
            None => {
                if event == JobEvent::Completed && self.legacy_completion_event {
                    let legacy = Notification::with_event_name(
                        job,
                        format!("{}_{}", self.namespace, event),
                        data.clone(),
                    );
                    let notification = Notification::for_job(job, &self.namespace, event, data);
                    self.publish(&notification).await;
                    self.publish(&legacy).await;
                } else {
                    let notification = Notification::for_job(job, &self.namespace, event, data);
                    self.publish(&notification).await;
                }
            }
        }
    }

    async fn post(&self, url: &str, notification: &Notification) {
        let body = match serde_json::to_string(notification) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to serialize notification");
                return;
            }
        };
        info!(event = %notification.event, "Notifying {} with message: {}", url, body);

        let result = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(status = %response.status(), "Notification delivered");
            }
            Ok(response) => {
                metrics::counter!("tfleet_notification_failures_total", "channel" => "webhook")
                    .increment(1);
                warn!(url, status = %response.status(), "Notification rejected");
            }
            Err(e) => {
                metrics::counter!("tfleet_notification_failures_total", "channel" => "webhook")
                    .increment(1);
                warn!(url, error = %e, "Notification failed");
            }
        }
    }

    async fn publish(&self, notification: &Notification) {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize notification");
                return;
            }
        };
        if let Err(e) = self.bus.publish(&notification.event, payload).await {
            metrics::counter!("tfleet_notification_failures_total", "channel" => "bus").increment(1);
            warn!(event = %notification.event, error = %e, "Bus notification failed");
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("namespace", &self.namespace)
            .field("legacy_completion_event", &self.legacy_completion_event)
            .finish()
    }
}
