//! Component D: resolve toponyms to coordinates.
//!
//! The throttle is grounded on this codebase's `scrapers::rate_limiter`:
//! a shared, lock-protected minimum-interval gate. The contract here is
//! narrower (one global interval rather than per-domain adaptive backoff),
//! so the state collapses to a single `Mutex<Instant>` rather than a
//! `HashMap<String, DomainState>`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

use crate::config::GeocodingConfig;
use crate::models::{Location, Provenance};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
struct CachedResult {
    latitude: f64,
    longitude: f64,
    display_name: String,
}

type CacheKey = (String, String);

/// Mutex-protected minimum-interval gate: at most one outbound geocoding
/// request in flight at a time, regardless of caller concurrency.
struct Throttle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new(min_interval: Duration) -> Self {
        Throttle {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Block until the minimum interval has elapsed since the last
    /// request, then record this request's start time. The lock is held
    /// for the whole wait, which is what makes the gate a true serializing
    /// critical section.
    async fn wait_turn(&self) {
        loop {
            let wait = {
                let mut guard = self.last_request.lock().unwrap();
                let now = Instant::now();
                let wait = guard
                    .map(|last| self.min_interval.saturating_sub(now.duration_since(last)))
                    .unwrap_or(Duration::ZERO);
                if wait.is_zero() {
                    *guard = Some(now);
                    return;
                }
                wait
            };
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct Geocoder {
    http: Client,
    config: GeocodingConfig,
    throttle: Throttle,
    cache: Mutex<LruCache<CacheKey, CachedResult>>,
    retry: RetryPolicy,
    locality_suffix: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    lat: String,
    lon: String,
    #[serde(rename = "display_name")]
    display_name: String,
}

impl Geocoder {
    pub fn new(http: Client, config: GeocodingConfig, city: &str) -> Geocoder {
        let throttle = Throttle::new(Duration::from_secs_f64(config.rate_limit_sec));
        let cache = Mutex::new(LruCache::new(
            NonZeroUsize::new(config.cache_capacity.max(1)).unwrap(),
        ));
        let retry = RetryPolicy::new(config.retries, 1.0, Duration::from_secs(30));
        let locality_suffix = format!(", {city}");
        Geocoder {
            http,
            config,
            throttle,
            cache,
            retry,
            locality_suffix,
        }
    }

    /// Idempotent: a location that already has coordinates (the gazetteer
    /// pass) is left untouched.
    pub async fn resolve(&self, location: &mut Location) {
        if location.has_coordinates() {
            return;
        }

        let key = (location.canonical_name.clone(), format!("{:?}", location.category));
        if let Some(cached) = self.cache_get(&key) {
            apply(location, cached.latitude, cached.longitude, cached.display_name, Provenance::RemoteGeocoder);
            location.validate_coordinates();
            return;
        }

        self.throttle.wait_turn().await;

        match self.query(&location.canonical_name).await {
            Some(result) => {
                apply(location, result.latitude, result.longitude, result.display_name, Provenance::RemoteGeocoder);
                location.validate_coordinates();
                if location.has_coordinates() {
                    self.cache_put(
                        key,
                        CachedResult {
                            latitude: location.latitude.unwrap(),
                            longitude: location.longitude.unwrap(),
                            display_name: location.display_name.clone().unwrap_or_default(),
                        },
                    );
                }
            }
            None => {
                warn!(canonical_name = %location.canonical_name, "geocoding produced no usable result");
                location.provenance = Provenance::Unresolved;
                location.validate_coordinates();
            }
        }
    }

    fn cache_get(&self, key: &CacheKey) -> Option<CachedResult> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    fn cache_put(&self, key: CacheKey, result: CachedResult) {
        self.cache.lock().unwrap().put(key, result);
    }

    async fn query(&self, canonical_name: &str) -> Option<CachedResult> {
        let query = format!("{canonical_name}{}", self.locality_suffix);
        let url = self.config.service_url.clone();
        let http = self.http.clone();

        let outcome = self
            .retry
            .run(
                || {
                    let http = http.clone();
                    let url = url.clone();
                    let query = query.clone();
                    async move {
                        let response = http
                            .get(&url)
                            .query(&[("q", query.as_str()), ("format", "json"), ("limit", "1")])
                            .send()
                            .await
                            .map_err(|_| GeocodeError::Retryable)?;
                        if response.status().is_client_error() {
                            return Ok(Vec::new());
                        }
                        if !response.status().is_success() {
                            return Err(GeocodeError::Retryable);
                        }
                        response
                            .json::<Vec<GeocodeResult>>()
                            .await
                            .map_err(|_| GeocodeError::Retryable)
                    }
                },
                |e| matches!(e, GeocodeError::Retryable),
            )
            .await;

        match outcome {
            Ok(results) => results.into_iter().next().and_then(|r| {
                let lat: f64 = r.lat.parse().ok()?;
                let lon: f64 = r.lon.parse().ok()?;
                debug!(lat, lon, "geocoded");
                Some(CachedResult {
                    latitude: lat,
                    longitude: lon,
                    display_name: r.display_name,
                })
            }),
            Err(GeocodeError::Retryable) => None,
        }
    }
}

#[derive(Debug)]
enum GeocodeError {
    Retryable,
}

fn apply(location: &mut Location, lat: f64, lon: f64, display_name: String, provenance: Provenance) {
    location.latitude = Some(lat);
    location.longitude = Some(lon);
    location.display_name = Some(display_name);
    location.provenance = provenance;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationCategory;

    fn sample_location() -> Location {
        Location {
            paper_id: "p1".into(),
            pdf_url: "https://x/1.pdf".into(),
            category: LocationCategory::Street,
            canonical_name: "Marienplatz".into(),
            latitude: None,
            longitude: None,
            display_name: None,
            provenance: Provenance::Unresolved,
        }
    }

    #[test]
    fn coordinate_validation_rejects_out_of_range() {
        let mut loc = sample_location();
        loc.latitude = Some(200.0);
        loc.longitude = Some(30.0);
        loc.provenance = Provenance::RemoteGeocoder;
        loc.validate_coordinates();
        assert!(loc.latitude.is_none());
        assert_eq!(loc.provenance, Provenance::Unresolved);
    }

    #[test]
    fn already_resolved_location_is_left_alone() {
        let mut loc = sample_location();
        loc.latitude = Some(48.1);
        loc.longitude = Some(11.5);
        loc.provenance = Provenance::Gazetteer;
        assert!(loc.has_coordinates());
    }

    #[tokio::test]
    async fn cache_hit_with_stale_invalid_coordinates_is_still_validated() {
        let config = GeocodingConfig {
            service_url: "http://127.0.0.1:0/search".into(),
            rate_limit_sec: 0.0,
            timeout_sec: 1,
            retries: 0,
            verify_tls: true,
            cache_capacity: 16,
        };
        let geocoder = Geocoder::new(Client::new(), config, "Springfield");
        let key = ("Marienplatz".to_string(), format!("{:?}", LocationCategory::Street));
        geocoder.cache_put(
            key,
            CachedResult {
                latitude: 200.0,
                longitude: 30.0,
                display_name: "bogus".into(),
            },
        );

        let mut loc = sample_location();
        geocoder.resolve(&mut loc).await;

        assert!(loc.latitude.is_none());
        assert_eq!(loc.provenance, Provenance::Unresolved);
    }

    #[tokio::test]
    async fn throttle_enforces_minimum_interval() {
        let throttle = Throttle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.wait_turn().await;
        throttle.wait_turn().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
