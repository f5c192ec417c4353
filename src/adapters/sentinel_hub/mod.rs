pub mod evalscripts;

use crate::adapters::raster::decode_geotiff;
use crate::config::Secrets;
use crate::domain::model::{BBox, Tile, TimeInterval};
use crate::domain::ports::ImageryProvider;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use ndarray::Array3;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const COLLECTION: &str = "sentinel-2-l2a";
const CRS84: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);
const DEFAULT_TOKEN_LIFETIME: u64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Sentinel Hub Process and Catalog API client with an OAuth2
/// client-credentials token cache.
pub struct SentinelHubClient {
    client: Client,
    secrets: Secrets,
    token: Mutex<Option<CachedToken>>,
}

impl SentinelHubClient {
    pub fn new(secrets: Secrets) -> Self {
        Self {
            client: Client::new(),
            secrets,
            token: Mutex::new(None),
        }
    }

    fn base_url(&self) -> &str {
        self.secrets.sh_base_url.trim_end_matches('/')
    }

    pub fn process_url(&self) -> String {
        format!("{}/api/v1/process", self.base_url())
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/api/v1/catalog/1.0.0/search", self.base_url())
    }

    /// Cached bearer token, fetched again once it is within 30s of expiry.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        tracing::debug!("Requesting access token from {}", self.secrets.sh_token_url);
        let response = self
            .client
            .post(&self.secrets.sh_token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.secrets.sh_client_id.as_str()),
                ("client_secret", self.secrets.sh_client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::AuthError {
                message: format!("token endpoint returned {}: {}", status, body),
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME);
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(token.access_token)
    }

    async fn post_json(&self, url: &str, body: &Value, accept: &str) -> Result<Response> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("Accept", accept)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            // Drop the cached token so the next call re-authenticates.
            *self.token.lock().await = None;
            return Err(EtlError::AuthError {
                message: format!("{} rejected the token ({}): {}", url, status, message),
            });
        }
        Err(EtlError::ProviderError {
            status: status.as_u16(),
            message,
        })
    }
}

fn day_start(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

fn day_end(date: NaiveDate) -> String {
    format!("{}T23:59:59Z", date.format("%Y-%m-%d"))
}

/// Process API request body for one bbox.
pub fn process_request(
    bbox: &BBox,
    interval: &TimeInterval,
    width: usize,
    height: usize,
    evalscript: &str,
    extra_filter: Option<Value>,
    response: Value,
) -> Value {
    let mut data_filter = json!({
        "timeRange": {"from": day_start(interval.0), "to": day_end(interval.1)}
    });
    if let (Some(Value::Object(extra)), Some(filter)) = (extra_filter, data_filter.as_object_mut()) {
        filter.extend(extra);
    }

    json!({
        "input": {
            "bounds": {
                "bbox": bbox.to_array(),
                "properties": {"crs": CRS84}
            },
            "data": [{"type": COLLECTION, "dataFilter": data_filter}]
        },
        "output": {
            "width": width,
            "height": height,
            "responses": [response]
        },
        "evalscript": evalscript
    })
}

/// The userdata document, whether or not the service wrapped it.
fn unwrap_userdata(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            for key in ["userdata.json", "userdata"] {
                if let Some(inner) = map.remove(key) {
                    return inner;
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

#[async_trait]
impl ImageryProvider for SentinelHubClient {
    async fn discover_orbits(&self, tile: &Tile, interval: &TimeInterval) -> Result<Value> {
        let body = process_request(
            &tile.bbox,
            interval,
            tile.width,
            tile.height,
            evalscripts::DISCOVER_ORBITS,
            None,
            json!({"identifier": "userdata", "format": {"type": "application/json"}}),
        );
        let response = self
            .post_json(&self.process_url(), &body, "application/json")
            .await?;
        let value: Value = response.json().await?;
        Ok(unwrap_userdata(value))
    }

    async fn fetch_tile(
        &self,
        tile: &Tile,
        date: NaiveDate,
        max_cloud_coverage: f64,
    ) -> Result<Array3<f32>> {
        let body = process_request(
            &tile.bbox,
            &(date, date),
            tile.width,
            tile.height,
            evalscripts::RAW_BANDS,
            Some(json!({
                "mosaickingOrder": "leastCC",
                "maxCloudCoverage": max_cloud_coverage
            })),
            json!({"identifier": "default", "format": {"type": "image/tiff"}}),
        );
        let response = self.post_json(&self.process_url(), &body, "image/tiff").await?;
        let bytes = response.bytes().await?;
        Ok(decode_geotiff(&bytes)?.data)
    }

    async fn fetch_product(&self, product_id: &str) -> Result<Option<Value>> {
        let body = json!({
            "collections": [COLLECTION],
            "ids": [product_id],
            "limit": 1
        });
        let response = self
            .post_json(&self.catalog_url(), &body, "application/geo+json")
            .await?;
        let value: Value = response.json().await?;
        Ok(value
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.first())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn secrets(server: &MockServer) -> Secrets {
        Secrets {
            sh_client_id: "client".to_string(),
            sh_client_secret: "secret".to_string(),
            sh_base_url: server.base_url(),
            sh_token_url: server.url("/oauth/token"),
        }
    }

    fn tile() -> Tile {
        Tile {
            index: 0,
            row: 0,
            col: 0,
            bbox: BBox::new(172.5, -43.9, 172.6, -43.8),
            width: 4,
            height: 3,
        }
    }

    fn interval() -> TimeInterval {
        (
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 31).unwrap(),
        )
    }

    #[test]
    fn test_process_request_body() {
        let body = process_request(
            &tile().bbox,
            &interval(),
            4,
            3,
            evalscripts::RAW_BANDS,
            Some(json!({"mosaickingOrder": "leastCC"})),
            json!({"identifier": "default"}),
        );
        assert_eq!(body["input"]["data"][0]["type"], COLLECTION);
        let filter = &body["input"]["data"][0]["dataFilter"];
        assert_eq!(filter["timeRange"]["from"], "2022-01-01T00:00:00Z");
        assert_eq!(filter["timeRange"]["to"], "2022-01-31T23:59:59Z");
        assert_eq!(filter["mosaickingOrder"], "leastCC");
        assert_eq!(body["output"]["width"], 4);
        assert_eq!(body["input"]["bounds"]["bbox"][0], 172.5);
    }

    #[test]
    fn test_unwrap_userdata() {
        let wrapped = json!({"userdata.json": {"orbits": []}});
        assert_eq!(unwrap_userdata(wrapped), json!({"orbits": []}));
        let direct = json!({"orbits": [1]});
        assert_eq!(unwrap_userdata(direct.clone()), direct);
    }

    #[tokio::test]
    async fn test_token_is_cached_across_requests() {
        let server = MockServer::start();
        let token_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("grant_type=client_credentials");
            then.status(200)
                .json_body(json!({"access_token": "abc", "expires_in": 3600}));
        });
        let process_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/process")
                .header("Authorization", "Bearer abc");
            then.status(200)
                .json_body(json!({"userdata.json": {"orbits": []}}));
        });

        let client = SentinelHubClient::new(secrets(&server));
        for _ in 0..2 {
            let doc = client.discover_orbits(&tile(), &interval()).await.unwrap();
            assert_eq!(doc, json!({"orbits": []}));
        }

        token_mock.assert_hits(1);
        process_mock.assert_hits(2);
    }

    #[tokio::test]
    async fn test_token_failure_is_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(401).body("invalid_client");
        });

        let client = SentinelHubClient::new(secrets(&server));
        let err = client.discover_orbits(&tile(), &interval()).await.unwrap_err();
        assert!(matches!(err, EtlError::AuthError { .. }));
    }

    #[tokio::test]
    async fn test_provider_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200).json_body(json!({"access_token": "abc"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/process");
            then.status(429).body("rate limited");
        });

        let client = SentinelHubClient::new(secrets(&server));
        match client.discover_orbits(&tile(), &interval()).await {
            Err(EtlError::ProviderError { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_product() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200).json_body(json!({"access_token": "abc"}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/catalog/1.0.0/search")
                .json_body_partial(r#"{"ids": ["S2A_FOUND"]}"#);
            then.status(200)
                .json_body(json!({"features": [{"id": "S2A_FOUND", "properties": {"eo:cloud_cover": 3.2}}]}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/catalog/1.0.0/search")
                .json_body_partial(r#"{"ids": ["S2A_MISSING"]}"#);
            then.status(200).json_body(json!({"features": []}));
        });

        let client = SentinelHubClient::new(secrets(&server));
        let found = client.fetch_product("S2A_FOUND").await.unwrap().unwrap();
        assert_eq!(found["id"], "S2A_FOUND");
        assert!(client.fetch_product("S2A_MISSING").await.unwrap().is_none());
    }
}
