//! Hermes push-service client.
//!
//! Fetches signed price updates for a feed from the oracle network's
//! off-chain HTTP service. The binary payload is what gets submitted to
//! the on-chain oracle; the parsed section is used for display and for
//! the in-process oracle.
//!
//! Endpoint: `GET {base}/v2/updates/price/latest?ids[]=<feed>`
//! Auth: none for the public instance; hosted providers take a bearer token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{PriceUpdateBundle, PriceUpdateSource};
use crate::types::{FeedId, Price};

pub const DEFAULT_BASE_URL: &str = "https://hermes.pyth.network";
const SOURCE_NAME: &str = "hermes";

// ---------------------------------------------------------------------------
// API response types (Hermes JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HermesResponse {
    binary: HermesBinary,
    #[serde(default)]
    parsed: Vec<HermesParsed>,
}

#[derive(Debug, Deserialize)]
struct HermesBinary {
    /// "hex" or "base64"; we always request hex.
    encoding: String,
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HermesParsed {
    /// Feed id without `0x`.
    id: String,
    price: HermesPrice,
}

/// Integer fields arrive as JSON strings.
#[derive(Debug, Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: u64,
}

impl HermesPrice {
    fn to_price(&self) -> Result<Price> {
        Ok(Price {
            price: self
                .price
                .parse()
                .with_context(|| format!("Bad price mantissa: {}", self.price))?,
            conf: self
                .conf
                .parse()
                .with_context(|| format!("Bad confidence: {}", self.conf))?,
            expo: self.expo,
            publish_time: self.publish_time,
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HermesClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HermesClient {
    pub fn new(base_url: Option<String>, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("WAGERCHAT/0.1.0 (price-bet-keeper)")
            .build()
            .context("Failed to build HTTP client for Hermes")?;

        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    fn latest_url(&self, feed: &FeedId) -> String {
        format!(
            "{}/v2/updates/price/latest?ids[]={}&encoding=hex&parsed=true",
            self.base_url,
            urlencoding::encode(&feed.to_hex()),
        )
    }

    fn into_bundle(response: HermesResponse) -> Result<PriceUpdateBundle> {
        if response.binary.encoding != "hex" {
            anyhow::bail!("Unexpected Hermes encoding: {}", response.binary.encoding);
        }

        let binary = response
            .binary
            .data
            .iter()
            .map(|chunk| {
                hex::decode(chunk.trim_start_matches("0x")).context("Hermes update data is not valid hex")
            })
            .collect::<Result<Vec<_>>>()?;

        let parsed = response
            .parsed
            .iter()
            .map(|p| {
                let id: FeedId = p.id.parse()?;
                Ok((id, p.price.to_price()?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PriceUpdateBundle { binary, parsed })
    }
}

#[async_trait]
impl PriceUpdateSource for HermesClient {
    async fn latest_update(&self, feed: &FeedId) -> Result<PriceUpdateBundle> {
        let url = self.latest_url(feed);
        debug!(url = %url, "Fetching Hermes price update");

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let resp = request.send().await.context("Hermes request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Hermes API error {status}: {body}");
        }

        let response: HermesResponse = resp
            .json()
            .await
            .context("Failed to parse Hermes price update response")?;

        let bundle = Self::into_bundle(response)?;
        if bundle.price_for(feed).is_none() {
            anyhow::bail!("Hermes response did not include feed {feed}");
        }
        Ok(bundle)
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
