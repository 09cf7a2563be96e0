use anyhow::{Context as _, Result};
use serde::Serialize;

use crate::provider::api::SwapTree;

/// Client for the external covenant-claim service. A reverse swap
/// registered here is claimed entirely by that service; the local
/// signing engine must never touch it afterwards.
#[derive(Debug, Clone)]
pub struct CovenantClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CovenantRegistration {
    pub address: String,
    pub preimage: String,
    pub swap_tree: SwapTree,
    pub claim_public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

impl CovenantClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn register(&self, registration: &CovenantRegistration) -> Result<()> {
        let url = format!("{}/covenant", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(registration)
            .send()
            .await
            .context("POST covenant registration")?;
        anyhow::ensure!(
            resp.status().is_success(),
            "covenant service rejected registration: {}",
            resp.status()
        );
        Ok(())
    }
}
