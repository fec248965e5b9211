//! Best-effort side channel that links a knowledge base to a call.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[async_trait::async_trait]
pub trait Associator: Send + Sync {
    async fn associate(&self, call_id: &str, knowledge_base_id: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct AssociateRequest<'a> {
    call_id: &'a str,
    knowledge_base_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AssociateResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// `POST {api_base}/api/calls/associate-kb`
pub struct HttpAssociator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAssociator {
    pub fn new(api_base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/calls/associate-kb", api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl Associator for HttpAssociator {
    async fn associate(&self, call_id: &str, knowledge_base_id: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&AssociateRequest {
                call_id,
                knowledge_base_id,
            })
            .send()
            .await
            .context("Failed to reach associate endpoint")?;

        let status = response.status();
        if !status.is_success() {
            bail!("associate endpoint returned {}", status);
        }

        let body: AssociateResponse = response
            .json()
            .await
            .context("Failed to parse associate response")?;

        if !body.success {
            bail!(
                "associate rejected: {}",
                body.message.unwrap_or_else(|| "no reason given".to_string())
            );
        }

        info!(
            "Knowledge base {} associated with call {}",
            knowledge_base_id, call_id
        );

        Ok(())
    }
}
