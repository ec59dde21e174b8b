//! Thin reqwest wrapper around the mix API.
//!
//! Route paths and form layouts are spelled out here and nowhere else.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

pub struct TestClient {
    pub client: reqwest::Client,
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            base_url,
        }
    }

    /// POST /mix with both files
    pub async fn submit_mix(
        &self,
        target_name: &str,
        target: Vec<u8>,
        reference_name: &str,
        reference: Vec<u8>,
    ) -> Response {
        let form = Form::new()
            .part("target", Part::bytes(target).file_name(target_name.to_string()))
            .part(
                "reference",
                Part::bytes(reference).file_name(reference_name.to_string()),
            );
        self.post_form(form).await
    }

    /// POST /mix with an arbitrary form
    pub async fn post_form(&self, form: Form) -> Response {
        self.client
            .post(format!("{}/mix", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Mix request failed")
    }

    /// POST /mix and return the job id, asserting success
    pub async fn submit_mix_ok(&self, target: Vec<u8>, reference: Vec<u8>) -> String {
        let response = self
            .submit_mix("target.wav", target, "reference.wav", reference)
            .await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::OK,
            "Mix submission failed"
        );
        let body: Value = response.json().await.expect("Invalid JSON");
        body["job_id"]
            .as_str()
            .expect("Missing job_id")
            .to_string()
    }

    pub async fn get_status(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/status/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Status request failed")
    }

    /// Poll /status until the job is completed or failed
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let start = std::time::Instant::now();
        loop {
            let response = self.get_status(job_id).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let body: Value = response.json().await.expect("Invalid JSON");
            match body["status"].as_str() {
                Some("completed") | Some("failed") => return body,
                _ => {}
            }
            if start.elapsed() > Duration::from_millis(JOB_TIMEOUT_MS) {
                panic!("Job {} did not finish in time: {}", job_id, body);
            }
            tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await;
        }
    }

    pub async fn download(&self, filename: &str) -> Response {
        self.client
            .get(format!("{}/download/{}", self.base_url, filename))
            .send()
            .await
            .expect("Download request failed")
    }

    /// GET a path relative to the base URL
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }

    pub async fn health(&self) -> Response {
        self.get("/health").await
    }

    pub async fn admin_stats(&self) -> Response {
        self.get("/admin/stats").await
    }

    pub async fn metrics(&self) -> Response {
        self.get("/metrics").await
    }
}
