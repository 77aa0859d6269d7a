// src/coordinator.rs
//
// Crawl-job coordination: the shared in-flight job table fed by run events,
// the batch fill policy, and the poll loop that waits a submitted run out.
// Events only carry the run id; polling the task endpoint is the source of
// truth, so missed or duplicated events can delay a run but never wedge it.

use anyhow::Result;
use chrono::Local;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::clients::crawl::{CrawlClient, RunInfo, RunResult};
use crate::config::AppConfig;
use crate::models::Candidate;

pub const RUN_SUCCEEDED_EVENT: &str = "ACTOR.RUN.SUCCEEDED";

/// A batch is only worth a crawl run when it is nearly full; smaller
/// remainders are left for a later sweep.
const BATCH_FILL_SHORTFALL: usize = 200;

/// Run-lifecycle event as delivered by the crawl service's event stream.
#[derive(Debug, Clone)]
pub struct CrawlEvent {
    pub event_type: String,
    pub task_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct JobEventData {
    pub run_id: String,
}

/// In-flight crawl jobs keyed by task id, shared between the submitting
/// sweep and the event listener.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<Mutex<HashMap<String, JobEventData>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        JobTracker {
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register(&self, task_id: &str) {
        let mut jobs = self.jobs.lock().await;
        jobs.insert(task_id.to_string(), JobEventData::default());
    }

    /// Applies one event. Events for unregistered tasks are ignored; only a
    /// run-succeeded event with a task id fills in the run id.
    pub async fn record_event(&self, event: &CrawlEvent) {
        if event.event_type != RUN_SUCCEEDED_EVENT || event.task_id.is_empty() {
            return;
        }
        let mut jobs = self.jobs.lock().await;
        if let Some(data) = jobs.get_mut(&event.task_id) {
            data.run_id = event.run_id.clone();
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<JobEventData> {
        let jobs = self.jobs.lock().await;
        jobs.get(task_id).cloned()
    }

    pub async fn remove(&self, task_id: &str) {
        let mut jobs = self.jobs.lock().await;
        jobs.remove(task_id);
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumes run events from the channel into the tracker until the sender
/// side closes.
pub fn spawn_event_listener(
    tracker: JobTracker,
    mut events: mpsc::Receiver<CrawlEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(
                "Crawl event {} for task {}",
                event.event_type, event.task_id
            );
            tracker.record_event(&event).await;
        }
    })
}

/// Version code stamped on every document of a crawl run, `yyyyMMdd`.
pub fn version_code_today() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Search texts from the page that still need crawling.
pub fn uncrawled_texts(texts: &[String], crawled: &[String]) -> Vec<String> {
    let crawled: HashSet<&str> = crawled.iter().map(String::as_str).collect();
    texts
        .iter()
        .filter(|t| !crawled.contains(t.as_str()))
        .cloned()
        .collect()
}

/// Whether a deduplicated batch is full enough to submit.
pub fn should_submit_batch(remaining: usize, batch_size: usize) -> bool {
    remaining >= batch_size.saturating_sub(BATCH_FILL_SHORTFALL)
}

/// Lifts a crawled place document into a resolver candidate. Documents
/// without a location cannot be distance-scored and yield `None`.
pub fn candidate_from_doc(doc: &Value) -> Option<Candidate> {
    let place_id = doc.get("placeId").and_then(Value::as_str)?;
    let location = doc.get("location")?;
    let lat = location.get("lat").and_then(Value::as_f64)?;
    let lng = location.get("lng").and_then(Value::as_f64)?;
    Some(Candidate {
        place_id: place_id.to_string(),
        name: doc
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        address: doc
            .get("address")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        lat,
        lng,
        category_name: doc
            .get("categoryName")
            .and_then(Value::as_str)
            .map(str::to_string),
        similarity: None,
    })
}

/// Stamps the run's version code on each crawled document in place.
pub fn stamp_version_code(docs: &mut [Value], version_code: &str) {
    for doc in docs.iter_mut() {
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "crawlVersionCode".to_string(),
                Value::String(version_code.to_string()),
            );
        }
    }
}

pub struct Coordinator {
    client: Arc<CrawlClient>,
    tracker: JobTracker,
    poll_max_attempts: u32,
    poll_interval: std::time::Duration,
}

impl Coordinator {
    pub fn new(client: Arc<CrawlClient>, tracker: JobTracker, config: &AppConfig) -> Self {
        Coordinator {
            client,
            tracker,
            poll_max_attempts: config.poll_max_attempts,
            poll_interval: config.poll_interval,
        }
    }

    /// Submits a batch and registers it with the tracker.
    pub async fn submit(&self, search_texts: &[String]) -> Result<Option<RunInfo>> {
        let run_info = self.client.create_task_and_run(search_texts).await?;
        if let Some(info) = &run_info {
            self.tracker.register(&info.task_id).await;
        }
        Ok(run_info)
    }

    /// Polls a submitted run to completion. A run counts as done only when
    /// the task endpoint reports SUCCEEDED **and** the event stream has
    /// supplied the run id to fetch results with. Returns `None` when the
    /// attempt budget runs out.
    pub async fn wait_for_run(&self, run_info: &RunInfo) -> Result<Option<RunResult>> {
        for attempt in 1..=self.poll_max_attempts {
            if self.tracker.get(&run_info.task_id).await.is_none() {
                warn!("Task {} no longer tracked, giving up", run_info.task_id);
                return Ok(None);
            }

            let succeeded = match self.client.get_task_running().await {
                Ok(status) => status
                    .runs
                    .iter()
                    .any(|r| r.task_id == run_info.task_id && r.status == "SUCCEEDED"),
                Err(e) => {
                    warn!("Task status poll failed: {}", e);
                    false
                }
            };

            if succeeded {
                let run_id = self
                    .tracker
                    .get(&run_info.task_id)
                    .await
                    .map(|d| d.run_id)
                    .unwrap_or_default();
                if !run_id.is_empty() {
                    match self.client.get_run_result(&run_id).await {
                        Ok(result) if result.run_status == "SUCCEEDED" => {
                            info!(
                                "Run {} succeeded with {} documents",
                                run_id,
                                result.data.len()
                            );
                            self.tracker.remove(&run_info.task_id).await;
                            return Ok(Some(result));
                        }
                        Ok(result) => {
                            debug!("Run {} status {}, keep polling", run_id, result.run_status)
                        }
                        Err(e) => warn!("Run result fetch failed: {}", e),
                    }
                } else {
                    debug!(
                        "Task {} succeeded but run id not yet delivered (attempt {})",
                        run_info.task_id, attempt
                    );
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(
            "Run for task {} did not finish within {} attempts",
            run_info.task_id, self.poll_max_attempts
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_should_submit_batch_threshold() {
        assert!(should_submit_batch(500, 500));
        assert!(should_submit_batch(300, 500));
        assert!(!should_submit_batch(299, 500));
        assert!(!should_submit_batch(0, 500));
        // tiny batch sizes never go negative
        assert!(should_submit_batch(0, 100));
    }

    #[test]
    fn test_uncrawled_texts_filters_known_strings() {
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let crawled = vec!["b".to_string()];
        assert_eq!(
            uncrawled_texts(&texts, &crawled),
            vec!["a".to_string(), "c".to_string()]
        );
        assert_eq!(uncrawled_texts(&texts, &[]).len(), 3);
    }

    #[test]
    fn test_candidate_from_doc() {
        let doc = json!({
            "placeId": "ChIJabc",
            "title": "Coffee X",
            "address": "12 Main St",
            "categoryName": "Cafe",
            "location": {"lat": 21.0, "lng": 105.8}
        });
        let candidate = candidate_from_doc(&doc).unwrap();
        assert_eq!(candidate.place_id, "ChIJabc");
        assert_eq!(candidate.category_name.as_deref(), Some("Cafe"));
        assert_eq!(candidate.lat, 21.0);

        // no location, no candidate
        assert!(candidate_from_doc(&json!({"placeId": "x"})).is_none());
    }

    #[test]
    fn test_stamp_version_code() {
        let mut docs = vec![json!({"placeId": "a"}), json!({"placeId": "b"})];
        stamp_version_code(&mut docs, "20260830");
        assert_eq!(docs[0]["crawlVersionCode"], "20260830");
        assert_eq!(docs[1]["crawlVersionCode"], "20260830");
    }

    #[test]
    fn test_version_code_shape() {
        let code = version_code_today();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_job_tracker_event_flow() {
        let tracker = JobTracker::new();
        tracker.register("task-1").await;

        // event for an unknown task is dropped
        tracker
            .record_event(&CrawlEvent {
                event_type: RUN_SUCCEEDED_EVENT.to_string(),
                task_id: "task-9".to_string(),
                run_id: "run-9".to_string(),
            })
            .await;
        assert!(tracker.get("task-9").await.is_none());

        // wrong event type does not fill the run id
        tracker
            .record_event(&CrawlEvent {
                event_type: "ACTOR.RUN.FAILED".to_string(),
                task_id: "task-1".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
        assert!(tracker.get("task-1").await.unwrap().run_id.is_empty());

        tracker
            .record_event(&CrawlEvent {
                event_type: RUN_SUCCEEDED_EVENT.to_string(),
                task_id: "task-1".to_string(),
                run_id: "run-1".to_string(),
            })
            .await;
        assert_eq!(tracker.get("task-1").await.unwrap().run_id, "run-1");

        tracker.remove("task-1").await;
        assert!(tracker.get("task-1").await.is_none());
    }
}
