//! Thin HTTP client over the daemon's `axum` surface (§6.2). Every method
//! wraps one API call; error bodies are parsed back into [`ClientError::Api`]
//! so command handlers can print the daemon's `{code, message}` directly.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlrs_core::error::ErrorBody;
use sqlrs_core::model::JobEvent;
use sqlrs_core::proto::{
    Accepted, DeleteResult, HealthResponse, InstanceEntry, JobStatusView, NameEntry, PrepareRequest, RunEvent,
    RunRequest, StateEntry,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}: {1}")]
    Api(String, String),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

fn ipc_timeout() -> Duration {
    std::env::var("SQLRS_TIMEOUT_IPC_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}

pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl DaemonClient {
    pub fn new(endpoint: &str, auth_token: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(ipc_timeout()).build()?;
        Ok(DaemonClient {
            http,
            base_url: format!("http://{endpoint}"),
            auth_token: auth_token.into(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.get(format!("{}{path}", self.base_url)).bearer_auth(&self.auth_token).send().await?;
        Self::decode(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.delete(format!("{}{path}", self.base_url)).bearer_auth(&self.auth_token).send().await?;
        Self::decode(resp).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.http.post(format!("{}{path}", self.base_url)).bearer_auth(&self.auth_token).send().await?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        let text = resp.text().await?;
        if status.is_success() || status == StatusCode::TEMPORARY_REDIRECT {
            serde_json::from_str(&text).map_err(|e| ClientError::Decode(format!("{e}: {text}")))
        } else if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
            Err(ClientError::Api(body.code, body.message))
        } else {
            Err(ClientError::Api(status.to_string(), text))
        }
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get("/v1/health").await
    }

    pub async fn submit_prepare(&self, request: &PrepareRequest) -> Result<Accepted, ClientError> {
        self.post_json("/v1/prepare-jobs", request).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<JobStatusView, ClientError> {
        self.get(&format!("/v1/prepare-jobs/{job_id}")).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatusView, ClientError> {
        self.post_empty(&format!("/v1/prepare-jobs/{job_id}/cancel")).await
    }

    pub async fn job_events(&self, job_id: &str) -> Result<Vec<JobEvent>, ClientError> {
        let resp = self
            .http
            .get(format!("{}/v1/prepare-jobs/{job_id}/events", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ClientError::Api(status.to_string(), text));
        }
        text.lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| ClientError::Decode(e.to_string())))
            .collect()
    }

    pub async fn list_names(&self) -> Result<Vec<NameEntry>, ClientError> {
        self.get("/v1/names").await
    }

    pub async fn get_name(&self, name: &str) -> Result<NameEntry, ClientError> {
        self.get(&format!("/v1/names/{name}")).await
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceEntry>, ClientError> {
        self.get("/v1/instances").await
    }

    pub async fn get_instance(&self, instance_ref: &str) -> Result<InstanceEntry, ClientError> {
        self.get(&format!("/v1/instances/{instance_ref}")).await
    }

    pub async fn delete_instance(&self, instance_ref: &str, force: bool, dry_run: bool) -> Result<DeleteResult, ClientError> {
        self.delete(&format!("/v1/instances/{instance_ref}?force={force}&dry_run={dry_run}")).await
    }

    pub async fn list_states(&self) -> Result<Vec<StateEntry>, ClientError> {
        self.get("/v1/states").await
    }

    pub async fn get_state(&self, state_id: &str) -> Result<StateEntry, ClientError> {
        self.get(&format!("/v1/states/{state_id}")).await
    }

    pub async fn delete_state(&self, state_id: &str, recurse: bool, force: bool, dry_run: bool) -> Result<DeleteResult, ClientError> {
        self.delete(&format!("/v1/states/{state_id}?recurse={recurse}&force={force}&dry_run={dry_run}")).await
    }

    pub async fn run(&self, request: &RunRequest) -> Result<Vec<RunEvent>, ClientError> {
        let resp = self
            .http
            .post(format!("{}/v1/runs", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ClientError::Api(status.to_string(), text));
        }
        text.lines()
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_str(l).map_err(|e| ClientError::Decode(e.to_string())))
            .collect()
    }

    pub async fn get_config(&self, path: &str, effective: bool) -> Result<Value, ClientError> {
        self.get(&format!("/v1/config?path={path}&effective={effective}")).await
    }

    pub async fn set_config(&self, path: &str, value: Value) -> Result<(), ClientError> {
        let resp = self
            .http
            .patch(format!("{}/v1/config?path={path}", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(&value)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await?;
            Err(ClientError::Api(status.to_string(), text))
        }
    }

    pub async fn remove_config(&self, path: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(format!("{}/v1/config?path={path}", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await?;
            Err(ClientError::Api(status.to_string(), text))
        }
    }

    pub async fn config_schema(&self) -> Result<Value, ClientError> {
        self.get("/v1/config/schema").await
    }
}
