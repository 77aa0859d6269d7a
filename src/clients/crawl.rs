// src/clients/crawl.rs
//
// Client for the crawl-task service: submit a batch of search texts as one
// crawl run, poll run status, fetch the result documents, and resolve Waze
// venue ids to google place ids.

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct RunInfo {
    pub task_id: String,
    #[serde(default)]
    pub run_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateTaskAndRunResp {
    run_info: Option<RunInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRun {
    pub task_id: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskRunningResponse {
    #[serde(default)]
    pub runs: Vec<TaskRun>,
}

#[derive(Debug, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub run_status: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunEventData {
    #[serde(rename = "actorTaskId", default)]
    pub actor_task_id: String,
    #[serde(rename = "actorRunId", default)]
    pub actor_run_id: String,
}

/// Run-lifecycle message from the crawl service's event feed.
#[derive(Debug, Clone, Deserialize)]
pub struct RunEventMsg {
    #[serde(rename = "eventType", default)]
    pub event_type: String,
    #[serde(rename = "eventData")]
    pub event_data: Option<RunEventData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueLatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "googlePlaceId", default)]
    pub google_place_id: String,
    #[serde(rename = "latLng")]
    pub lat_lng: Option<VenueLatLng>,
}

pub struct CrawlClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CrawlClient {
    pub fn new(config: &AppConfig) -> Self {
        CrawlClient {
            http: reqwest::Client::new(),
            base_url: config.crawl_base_url.clone(),
            api_key: config.crawl_api_key.clone(),
        }
    }

    /// Submits one crawl run over the given search texts. `run_id` in the
    /// returned info may be empty until the run-succeeded event arrives.
    pub async fn create_task_and_run(&self, search_texts: &[String]) -> Result<Option<RunInfo>> {
        let url = format!("{}/api/crw/create_task_and_run_crawl_gg", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&search_texts)
            .send()
            .await
            .context("Crawl task submission failed")?
            .error_for_status()
            .context("Crawl task submission returned an error status")?;
        let body: CreateTaskAndRunResp = response
            .json()
            .await
            .context("Failed to decode crawl task submission response")?;
        debug!(
            "Submitted crawl run over {} search texts (task: {:?})",
            search_texts.len(),
            body.run_info.as_ref().map(|r| r.task_id.as_str())
        );
        Ok(body.run_info)
    }

    /// Recently running/finished tasks, newest first.
    pub async fn get_task_running(&self) -> Result<TaskRunningResponse> {
        let url = format!(
            "{}/api/crw/get_task_running?limit=10&offset=0&desc=true",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Crawl task status request failed")?
            .error_for_status()
            .context("Crawl task status returned an error status")?;
        response
            .json()
            .await
            .context("Failed to decode crawl task status response")
    }

    pub async fn get_run_result(&self, run_id: &str) -> Result<RunResult> {
        let url = format!("{}/api/crw/runs/{}/data", self.base_url, run_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Crawl run result request failed")?
            .error_for_status()
            .context("Crawl run result returned an error status")?;
        response
            .json()
            .await
            .context("Failed to decode crawl run result")
    }

    /// Recent run-lifecycle events, newest first. The crawl service buffers
    /// these for late consumers, so re-reading the same window is safe.
    pub async fn get_run_events(&self, limit: u32) -> Result<Vec<RunEventMsg>> {
        let url = format!("{}/api/crw/run_events?limit={}", self.base_url, limit);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Crawl event feed request failed")?
            .error_for_status()
            .context("Crawl event feed returned an error status")?;
        response
            .json()
            .await
            .context("Failed to decode crawl event feed response")
    }

    /// Resolves a bare Waze venue id (without the `venues.` prefix) to its
    /// venue record. Returns `None` on a non-success status.
    pub async fn get_venue(&self, venue_id: &str) -> Result<Option<VenueInfo>> {
        let url = format!("{}/api/wz/v_info/venue", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("v_id", venue_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("Venue lookup request failed")?;
        if !response.status().is_success() {
            debug!("Venue lookup for '{}' returned {}", venue_id, response.status());
            return Ok(None);
        }
        let venue: VenueInfo = response
            .json()
            .await
            .context("Failed to decode venue lookup response")?;
        Ok(Some(venue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_create_task_and_run_response() {
        let body = r#"{"task_info": {"id": "t1"}, "run_info": {"task_id": "t1"}}"#;
        let resp: CreateTaskAndRunResp = serde_json::from_str(body).unwrap();
        let info = resp.run_info.unwrap();
        assert_eq!(info.task_id, "t1");
        // run_id arrives later via the run-succeeded event
        assert!(info.run_id.is_empty());
    }

    #[test]
    fn test_decode_task_running_response() {
        let body = r#"{"runs": [{"task_id": "t1", "status": "SUCCEEDED"},
                                {"task_id": "t2", "status": "RUNNING"}]}"#;
        let resp: TaskRunningResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.runs.len(), 2);
        assert!(resp
            .runs
            .iter()
            .any(|r| r.task_id == "t1" && r.status == "SUCCEEDED"));
    }

    #[test]
    fn test_decode_run_result_defaults() {
        let resp: RunResult = serde_json::from_str("{}").unwrap();
        assert!(resp.run_status.is_empty());
        assert!(resp.data.is_empty());
    }

    #[test]
    fn test_decode_run_event_msg() {
        let body = r#"[{"eventType": "ACTOR.RUN.SUCCEEDED",
                        "eventData": {"actorTaskId": "t1", "actorRunId": "r1"}},
                       {"eventType": "ACTOR.RUN.CREATED"}]"#;
        let events: Vec<RunEventMsg> = serde_json::from_str(body).unwrap();
        assert_eq!(events.len(), 2);
        let data = events[0].event_data.as_ref().unwrap();
        assert_eq!(data.actor_task_id, "t1");
        assert_eq!(data.actor_run_id, "r1");
        assert!(events[1].event_data.is_none());
    }

    #[test]
    fn test_decode_venue_info() {
        let body = r#"{"id": "12345", "name": "Coffee X",
                       "googlePlaceId": "ChIJabc", "latLng": {"lat": 21.0, "lng": 105.8}}"#;
        let venue: VenueInfo = serde_json::from_str(body).unwrap();
        assert_eq!(venue.google_place_id, "ChIJabc");
        assert_eq!(venue.lat_lng.unwrap().lat, 21.0);
    }
}
