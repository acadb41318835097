//! Typed client for the upstream real-estate transaction API: paginated
//! market-activity feed and batched property-detail fetch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use fliptrack_core::{parse_feed_date, FactKind, PropertyFact};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "fliptrack-api";

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADDRESS_BATCH_DELIMITER: &str = "|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response body for {url}: {message}")]
    Malformed { url: String, message: String },
}

/// One record from the market-activity feed, validated at the boundary.
/// Records whose address or dates are unusable never leave this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub buyer_name: Option<String>,
    pub seller_name: Option<String>,
    pub buyer_ownership_code: Option<String>,
    pub sale_date: NaiveDate,
    pub recording_date: NaiveDate,
    pub sale_price: Option<f64>,
    pub listing_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRecordWire {
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    buyer_name: Option<String>,
    seller_name: Option<String>,
    buyer_ownership_code: Option<String>,
    sale_date: Option<String>,
    recording_date: Option<String>,
    sale_price: Option<f64>,
    listing_status: Option<String>,
}

impl ActivityRecord {
    fn from_wire(wire: ActivityRecordWire) -> Option<Self> {
        let address = wire.address.as_deref().map(str::trim).unwrap_or_default();
        if address.is_empty() {
            return None;
        }
        let sale_date = parse_feed_date(wire.sale_date.as_deref()?)?;
        // The feed occasionally omits recordingDate; the sale date is the
        // closest usable anchor in that case.
        let recording_date = wire
            .recording_date
            .as_deref()
            .and_then(parse_feed_date)
            .unwrap_or(sale_date);
        Some(Self {
            address: address.to_string(),
            city: wire.city,
            state: wire.state,
            buyer_name: wire.buyer_name,
            seller_name: wire.seller_name,
            buyer_ownership_code: wire.buyer_ownership_code,
            sale_date,
            recording_date,
            sale_price: wire.sale_price,
            listing_status: wire.listing_status,
        })
    }
}

/// Full property detail for one address, keyed by the source system's stable
/// property id.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDetail {
    pub external_property_id: String,
    pub address: String,
    pub property_type: Option<String>,
    pub vacant: Option<bool>,
    pub hoa: Option<bool>,
    pub owner_type: Option<String>,
    pub purchase_method: Option<String>,
    pub listing_status: Option<String>,
    pub months_owned: Option<i32>,
    pub county: Option<String>,
    pub facts: Vec<PropertyFact>,
}

/// One entry of a batch-detail response: either a detail record or a
/// per-address error from the upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDetailEntry {
    pub address: String,
    pub detail: Option<PropertyDetail>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDetailEntryWire {
    address: Option<String>,
    error: Option<String>,
    property: Option<PropertyDetailWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDetailWire {
    property_id: Option<String>,
    property_type: Option<String>,
    vacant: Option<bool>,
    hoa: Option<bool>,
    owner_type: Option<String>,
    purchase_method: Option<String>,
    listing_status: Option<String>,
    months_owned: Option<i32>,
    county: Option<String>,
    #[serde(default)]
    assessments: Vec<serde_json::Value>,
    #[serde(default)]
    structures: Vec<serde_json::Value>,
    #[serde(default)]
    valuations: Vec<serde_json::Value>,
}

fn detail_entry_from_wire(wire: PropertyDetailEntryWire) -> Option<PropertyDetailEntry> {
    let address = wire.address.as_deref().map(str::trim).unwrap_or_default();
    if address.is_empty() {
        return None;
    }
    let address = address.to_string();
    if let Some(error) = wire.error {
        return Some(PropertyDetailEntry {
            address,
            detail: None,
            error: Some(error),
        });
    }
    let Some(property) = wire.property else {
        return Some(PropertyDetailEntry {
            address,
            detail: None,
            error: Some("response entry carried neither property nor error".to_string()),
        });
    };
    let Some(external_property_id) = property
        .property_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
    else {
        return Some(PropertyDetailEntry {
            address,
            detail: None,
            error: Some("property record missing propertyId".to_string()),
        });
    };

    let mut facts = Vec::new();
    for (kind, payloads) in [
        (FactKind::Assessment, property.assessments),
        (FactKind::Structure, property.structures),
        (FactKind::Valuation, property.valuations),
    ] {
        for payload in payloads {
            facts.push(PropertyFact { kind, payload });
        }
    }

    Some(PropertyDetailEntry {
        detail: Some(PropertyDetail {
            external_property_id,
            address: address.clone(),
            property_type: property.property_type,
            vacant: property.vacant,
            hoa: property.hoa,
            owner_type: property.owner_type,
            purchase_method: property.purchase_method,
            listing_status: property.listing_status,
            months_owned: property.months_owned,
            county: property.county,
            facts,
        }),
        address,
        error: None,
    })
}

/// The upstream API surface the sync pipeline consumes. Implemented over HTTP
/// in production and by scripted fakes in tests.
#[async_trait]
pub trait ActivityFeed: Send + Sync {
    /// One page of the market feed, ascending by sale date over
    /// `[min_date, max_date]`.
    async fn fetch_market_page(
        &self,
        msa: &str,
        min_date: NaiveDate,
        max_date: NaiveDate,
        page_size: usize,
    ) -> Result<Vec<ActivityRecord>, FeedError>;

    /// Full detail for a batch of addresses, pipe-joined into one query.
    async fn fetch_property_batch(
        &self,
        addresses: &[String],
    ) -> Result<Vec<PropertyDetailEntry>, FeedError>;
}

#[derive(Debug)]
pub struct HttpActivityFeed {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff: BackoffPolicy,
}

impl HttpActivityFeed {
    pub fn new(config: ApiConfig) -> Result<Self, FeedError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            backoff: config.backoff,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FeedError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let resp_result = self
                .client
                .get(url)
                .header(API_KEY_HEADER, &self.api_key)
                .query(query)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return serde_json::from_slice(&body).map_err(|err| {
                            FeedError::Malformed {
                                url: final_url,
                                message: err.to_string(),
                            }
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FeedError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FeedError::Request(err));
                }
            }
        }

        Err(FeedError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[async_trait]
impl ActivityFeed for HttpActivityFeed {
    async fn fetch_market_page(
        &self,
        msa: &str,
        min_date: NaiveDate,
        max_date: NaiveDate,
        page_size: usize,
    ) -> Result<Vec<ActivityRecord>, FeedError> {
        let url = format!("{}/buyers/market", self.base_url);
        let query = [
            ("msa", msa.to_string()),
            ("sales_date_min", min_date.format("%Y-%m-%d").to_string()),
            ("sales_date_max", max_date.format("%Y-%m-%d").to_string()),
            ("page_size", page_size.to_string()),
            ("sort", "sale_date".to_string()),
        ];
        let wires: Vec<ActivityRecordWire> = self.get_json(&url, &query).await?;
        let total = wires.len();
        let records: Vec<ActivityRecord> = wires
            .into_iter()
            .filter_map(ActivityRecord::from_wire)
            .collect();
        if records.len() < total {
            debug!(
                dropped = total - records.len(),
                "dropped feed records with unusable address or dates"
            );
        }
        Ok(records)
    }

    async fn fetch_property_batch(
        &self,
        addresses: &[String],
    ) -> Result<Vec<PropertyDetailEntry>, FeedError> {
        let url = format!("{}/properties/batch", self.base_url);
        let query = [("addresses", addresses.join(ADDRESS_BATCH_DELIMITER))];
        let wires: Vec<PropertyDetailEntryWire> = self.get_json(&url, &query).await?;
        Ok(wires.into_iter().filter_map(detail_entry_from_wire).collect())
    }
}
