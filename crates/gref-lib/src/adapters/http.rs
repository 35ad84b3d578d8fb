//! HTTP implementations of the external adapter seams.
//!
//! The eval runner, failure analyzer, and guideline merge run as separate
//! services; the orchestrator talks JSON over HTTP with a per-call timeout
//! and waits for a health endpoint before first use.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use gref_types::{
    EvalRunResult, FailureAnalysis, GuidelineEdit, GuidelineRef, GuidelineSection,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::{AnalysisRequest, EvalRunRequest, EvalSuiteRunner, FailureAnalyzer, GuidelineStore};

/// Shared request plumbing for the three services.
#[derive(Debug, Clone)]
struct JsonService {
    client: reqwest::Client,
    base_url: String,
}

impl JsonService {
    fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Poll the health endpoint until the service answers or attempts run
    /// out, one second apart.
    async fn wait_until_healthy(&self, attempts: u32) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        for attempt in 1..=attempts {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, attempt, "service healthy");
                    return Ok(());
                }
                _ => sleep(Duration::from_secs(1)).await,
            }
        }
        bail!("timed out waiting for {url} to become healthy");
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{url} returned {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }

    async fn get_json<Resp: DeserializeOwned>(&self, endpoint: &str) -> Result<Resp> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{url} returned {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }
}

/// Eval runner service client. POSTs the run request to `/run`.
pub struct HttpEvalRunner {
    service: JsonService,
}

impl HttpEvalRunner {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            service: JsonService::new(base_url, timeout)?,
        })
    }

    pub async fn wait_until_healthy(&self, attempts: u32) -> Result<()> {
        self.service.wait_until_healthy(attempts).await
    }
}

#[async_trait]
impl EvalSuiteRunner for HttpEvalRunner {
    async fn run_suite(&self, request: &EvalRunRequest) -> Result<EvalRunResult> {
        self.service.post_json("run", request).await
    }
}

/// Failure analyzer service client. POSTs the failing eval to `/analyze`.
pub struct HttpFailureAnalyzer {
    service: JsonService,
}

impl HttpFailureAnalyzer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            service: JsonService::new(base_url, timeout)?,
        })
    }

    pub async fn wait_until_healthy(&self, attempts: u32) -> Result<()> {
        self.service.wait_until_healthy(attempts).await
    }
}

#[async_trait]
impl FailureAnalyzer for HttpFailureAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<FailureAnalysis> {
        self.service.post_json("analyze", request).await
    }
}

/// Guideline merge service client. GETs the section tree from `/document`
/// and POSTs suggested edits to `/merge`; the service rewrites the rendered
/// document and answers with the updated reference.
pub struct HttpGuidelineStore {
    service: JsonService,
}

impl HttpGuidelineStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            service: JsonService::new(base_url, timeout)?,
        })
    }

    pub async fn wait_until_healthy(&self, attempts: u32) -> Result<()> {
        self.service.wait_until_healthy(attempts).await
    }
}

#[async_trait]
impl GuidelineStore for HttpGuidelineStore {
    async fn document(&self) -> Result<GuidelineSection> {
        self.service.get_json("document").await
    }

    async fn apply_edits(&self, edits: &[GuidelineEdit]) -> Result<GuidelineRef> {
        self.service.post_json("merge", &edits).await
    }
}
