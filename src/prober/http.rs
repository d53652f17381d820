//! HTTP prober - binds the prober operations to a JSON booking API.
//!
//! Endpoints, relative to the base URL:
//! - `GET  health`                  session check
//! - `GET  resources/{r}/slots`     `[{"date": "2024-05-02", "visible": true}]`
//! - `POST resources/{r}/claims`    body `{"date": ...}`, reply `{"status": "confirmed" | "conflicted"}`
//! - `POST resources/{r}/confirm`   finalize the desk's pending claims
//! - `GET  claims`                  `[{"cells": ["P17-1001", ...]}]`
//! - `DELETE resources/{r}/claims/{date}`  give a held claim back

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::AvailabilityProber;
use crate::domain::{ClaimOutcome, ClaimRow, Resource, Slot};
use crate::error::ProbeError;

/// Configuration for the HTTP prober
#[derive(Debug, Clone)]
pub struct HttpProberConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Upper bound for any single request
    pub timeout: Duration,
}

impl Default for HttpProberConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/".to_string(),
            token: None,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlotDto {
    date: NaiveDate,
    #[serde(default = "default_visible")]
    visible: bool,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ClaimReply {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Map a reply to a claim request onto an outcome.
///
/// 409 is a conflict whatever the body says. Any other non-2xx status, an
/// unreadable body or an unknown status string leaves the claim state unknown.
fn claim_outcome(status: StatusCode, body: &str) -> Result<ClaimOutcome, ProbeError> {
    if status == StatusCode::CONFLICT {
        return Ok(ClaimOutcome::Conflicted);
    }
    if !status.is_success() {
        return Err(ProbeError::Unexpected(format!("API error {}: {}", status, body)));
    }

    let reply: ClaimReply = serde_json::from_str(body)
        .map_err(|e| ProbeError::Unexpected(format!("Failed to parse claim reply: {}", e)))?;

    match reply.status.as_str() {
        "confirmed" => Ok(ClaimOutcome::Confirmed),
        "conflicted" => Ok(ClaimOutcome::Conflicted),
        other => Err(ProbeError::Unexpected(format!(
            "claim status '{}': {}",
            other,
            reply.message.unwrap_or_default()
        ))),
    }
}

/// Prober talking to the booking system over HTTP
pub struct HttpProber {
    client: Client,
    config: HttpProberConfig,
}

impl HttpProber {
    pub fn new(config: HttpProberConfig) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProbeError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProbeError> {
        let timeout_ms = self.config.timeout.as_millis() as u64;
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout_ms)
            } else {
                ProbeError::Transport(e.to_string())
            }
        })
    }

    async fn expect_success(response: Response) -> Result<Response, ProbeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(ProbeError::Unexpected(format!("API error {}: {}", status, body)))
    }

    fn resource_path(resource: &Resource, tail: &str) -> String {
        format!("resources/{}/{}", resource.as_str(), tail)
    }

    async fn claim(&self, resource: &Resource, date: NaiveDate) -> Result<ClaimOutcome, ProbeError> {
        let request = self
            .client
            .post(self.url(&Self::resource_path(resource, "claims")))
            .json(&json!({ "date": date }));
        let response = self.send(request).await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Transport(format!("Failed to read claim reply: {}", e)))?;
        claim_outcome(status, &body)
    }
}

impl std::fmt::Debug for HttpProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProber")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[async_trait]
impl AvailabilityProber for HttpProber {
    async fn establish_session(&self) -> Result<(), ProbeError> {
        let response = self.send(self.client.get(self.url("health"))).await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn list_visible_slots(&self, resource: &Resource) -> Result<Vec<Slot>, ProbeError> {
        let request = self.client.get(self.url(&Self::resource_path(resource, "slots")));
        let slots: Vec<SlotDto> = Self::expect_success(self.send(request).await?)
            .await?
            .json()
            .await
            .map_err(|e| ProbeError::Unexpected(format!("Failed to parse slots: {}", e)))?;

        Ok(slots
            .into_iter()
            .map(|s| Slot::new(resource.clone(), s.date, s.visible))
            .collect())
    }

    async fn attempt_claim(&self, resource: &Resource, date: NaiveDate) -> ClaimOutcome {
        match self.claim(resource, date).await {
            Ok(outcome) => outcome,
            Err(e) => ClaimOutcome::Error(e),
        }
    }

    async fn confirm_batch(&self, resource: &Resource) -> Result<(), ProbeError> {
        let request = self.client.post(self.url(&Self::resource_path(resource, "confirm")));
        Self::expect_success(self.send(request).await?).await?;
        Ok(())
    }

    async fn list_my_claims(&self) -> Result<Vec<ClaimRow>, ProbeError> {
        let request = self.client.get(self.url("claims"));
        Self::expect_success(self.send(request).await?)
            .await?
            .json()
            .await
            .map_err(|e| ProbeError::Unexpected(format!("Failed to parse claims: {}", e)))
    }

    async fn cancel_claim(&self, resource: &Resource, date: NaiveDate) -> Result<(), ProbeError> {
        let path = Self::resource_path(resource, &format!("claims/{}", date));
        let request = self.client.delete(self.url(&path));
        Self::expect_success(self.send(request).await?).await?;
        Ok(())
    }
}
