use std::time::{Duration, Instant};

use dashmap::DashMap;
use memgate_core::config::MapsConfig;
use serde_json::Value;
use tracing::warn;

const AMAP_BASE_URL: &str = "https://restapi.amap.com/v3";
const AMAP_TIMEOUT_SECS: u64 = 10;
/// Map-tool responses are cached per-process keyed by the request's own
/// address/location text; 600s is generous enough to absorb repeat lookups
/// within one conversation without serving stale directions (§9A).
const CACHE_TTL_SECS: u64 = 600;

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// Thin formatter over the AMap (高德地图) REST API: geocode, nearby
/// search, keyword search, distance, and route. Each call is cached by a
/// `"<op>|<key>"` string for `CACHE_TTL_SECS`.
pub struct MapsClient {
    http: reqwest::Client,
    config: MapsConfig,
    cache: DashMap<String, CacheEntry>,
}

impl MapsClient {
    pub fn new(http: reqwest::Client, config: MapsConfig) -> Self {
        Self {
            http,
            config,
            cache: DashMap::new(),
        }
    }

    fn cached_or(&self, cache_key: &str) -> Option<Value> {
        self.cache.get(cache_key).and_then(|entry| {
            if entry.inserted_at.elapsed() < Duration::from_secs(CACHE_TTL_SECS) {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn store_cache(&self, cache_key: String, value: Value) {
        self.cache.insert(
            cache_key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Option<Value> {
        let Some(key) = &self.config.api_key else {
            warn!("maps tool called without an api key configured");
            return None;
        };
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("key", key));
        query.push(("output", "JSON"));

        let base = self
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| AMAP_BASE_URL.to_string());
        let url = format!("{base}{path}");

        let result = self
            .http
            .get(url)
            .query(&query)
            .timeout(Duration::from_secs(AMAP_TIMEOUT_SECS))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => resp.json::<Value>().await.ok(),
            Ok(resp) => {
                warn!(status = %resp.status(), "amap request returned non-200");
                None
            }
            Err(e) => {
                warn!(error = %e, "amap request failed");
                None
            }
        }
    }

    /// Geocodes a free-text address, optionally scoped to a city.
    pub async fn geocode(&self, address: &str, city: Option<&str>) -> Option<Value> {
        let cache_key = format!("geocode|{address}|{}", city.unwrap_or(""));
        if let Some(cached) = self.cached_or(&cache_key) {
            return Some(cached);
        }
        let mut params = vec![("address", address)];
        if let Some(c) = city {
            params.push(("city", c));
        }
        let value = self.get("/geocode/geo", &params).await?;
        self.store_cache(cache_key, value.clone());
        Some(value)
    }

    /// Points of interest within `radius` meters of `location` ("lng,lat").
    pub async fn around(&self, location: &str, keyword: &str, radius: u32) -> Option<Value> {
        let cache_key = format!("around|{location}|{keyword}|{radius}");
        if let Some(cached) = self.cached_or(&cache_key) {
            return Some(cached);
        }
        let radius_str = radius.to_string();
        let params = vec![
            ("location", location),
            ("keywords", keyword),
            ("radius", radius_str.as_str()),
        ];
        let value = self.get("/place/around", &params).await?;
        self.store_cache(cache_key, value.clone());
        Some(value)
    }

    /// Keyword POI search, optionally scoped to a city.
    pub async fn search(&self, keyword: &str, city: Option<&str>) -> Option<Value> {
        let cache_key = format!("search|{keyword}|{}", city.unwrap_or(""));
        if let Some(cached) = self.cached_or(&cache_key) {
            return Some(cached);
        }
        let mut params = vec![("keywords", keyword)];
        if let Some(c) = city {
            params.push(("city", c));
        }
        let value = self.get("/place/text", &params).await?;
        self.store_cache(cache_key, value.clone());
        Some(value)
    }

    /// Straight-line/driving distance between two "lng,lat" points.
    pub async fn distance(&self, origin: &str, destination: &str) -> Option<Value> {
        let cache_key = format!("distance|{origin}|{destination}");
        if let Some(cached) = self.cached_or(&cache_key) {
            return Some(cached);
        }
        let params = vec![("origins", origin), ("destination", destination)];
        let value = self.get("/distance", &params).await?;
        self.store_cache(cache_key, value.clone());
        Some(value)
    }

    /// Driving directions between two "lng,lat" points.
    pub async fn route(&self, origin: &str, destination: &str) -> Option<Value> {
        let cache_key = format!("route|{origin}|{destination}");
        if let Some(cached) = self.cached_or(&cache_key) {
            return Some(cached);
        }
        let params = vec![("origin", origin), ("destination", destination)];
        let value = self.get("/direction/driving", &params).await?;
        self.store_cache(cache_key, value.clone());
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MapsClient {
        MapsClient::new(reqwest::Client::new(), MapsConfig::default())
    }

    #[test]
    fn cache_starts_empty() {
        let c = client();
        assert!(c.cached_or("geocode|somewhere|").is_none());
    }

    #[test]
    fn cache_roundtrips_a_stored_value() {
        let c = client();
        c.store_cache("geocode|x|".to_string(), serde_json::json!({"ok": true}));
        let hit = c.cached_or("geocode|x|");
        assert_eq!(hit, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn geocode_without_api_key_returns_none() {
        let c = client();
        assert!(c.geocode("天安门", None).await.is_none());
    }
}
