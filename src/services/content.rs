//! Off-chain metadata JSON and NFT floor prices over plain HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;

use super::metadata::extract_cid;
use super::{json_response, ContentFetcher, FloorPriceSource};
use crate::fetch::FetchError;

#[derive(Debug, Deserialize)]
struct FloorResponse {
    #[serde(rename = "usdValue", default)]
    usd_value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HttpContent {
    http: reqwest::Client,
    ipfs_gateway: String,
    floor_price_url: Option<String>,
}

impl HttpContent {
    pub fn new(ipfs_gateway: &str, floor_price_url: Option<&str>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::from_reqwest("content", e))?;
        Ok(Self {
            http,
            ipfs_gateway: ipfs_gateway.trim_end_matches('/').to_string(),
            floor_price_url: floor_price_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    /// Where to fetch the JSON for a metadata URI: the gateway for anything
    /// carrying a CID, the URI itself for other http(s) locations.
    pub fn json_location(&self, uri: &str) -> Option<String> {
        if let Some(cid) = extract_cid(uri) {
            return Some(format!("{}/{}", self.ipfs_gateway, cid));
        }
        if uri.starts_with("https://") || uri.starts_with("http://") {
            return Some(uri.to_string());
        }
        None
    }
}

#[async_trait]
impl ContentFetcher for HttpContent {
    async fn image_for(&self, uri: &str) -> Result<Option<String>, FetchError> {
        let Some(location) = self.json_location(uri) else {
            return Ok(None);
        };
        let response = self
            .http
            .get(&location)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("ipfs", e))?;
        let body: Value = json_response("ipfs", response).await?;
        Ok(body
            .get("image")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl FloorPriceSource for HttpContent {
    async fn floor_usd(&self, collection: &Pubkey) -> Result<Option<f64>, FetchError> {
        let Some(url) = &self.floor_price_url else {
            return Ok(None);
        };
        let response = self
            .http
            .get(url)
            .query(&[("ca", collection.to_string())])
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("floor", e))?;
        let body: FloorResponse = json_response("floor", response).await?;
        Ok(body.usd_value.filter(|v| v.is_finite() && *v >= 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_location() {
        let content = HttpContent::new("https://cf-ipfs.com/ipfs/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            content.json_location("ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").as_deref(),
            Some("https://cf-ipfs.com/ipfs/QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG")
        );
        assert_eq!(
            content.json_location("https://arweave.net/xyz").as_deref(),
            Some("https://arweave.net/xyz")
        );
        assert_eq!(content.json_location("ar://xyz"), None);
    }
}
