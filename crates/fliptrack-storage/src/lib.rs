//! Persistence contracts for the sync pipeline: the `SyncStore` trait, the
//! Postgres implementation, and an in-memory store for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fliptrack_core::{company_comparison_key, same_county, FactKind, PropertyStatus, TransactionKind};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CRATE_NAME: &str = "fliptrack-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unrecognized {column} value in storage: {value}")]
    UnknownEnum { column: &'static str, value: String },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Per-market incremental sync position. One row per market; the confirmed
/// sale date only ever moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub id: Uuid,
    pub market: String,
    pub last_confirmed_sale_date: Option<NaiveDate>,
    pub total_records_synced: i64,
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
}

/// A persisted corporate entity. `canonical_name` is unique in storage;
/// lookups key on the comparison form of the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub canonical_name: String,
    pub counties_serviced: Vec<String>,
}

impl Company {
    pub fn comparison_key(&self) -> String {
        company_comparison_key(&self.canonical_name)
    }

    pub fn services_county(&self, county: &str) -> bool {
        self.counties_serviced
            .iter()
            .any(|existing| same_county(existing, county))
    }
}

/// A stored property, keyed externally by the source system's stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    pub id: Uuid,
    pub external_property_id: String,
    pub market: String,
    pub address: String,
    pub county: Option<String>,
    pub property_type: Option<String>,
    pub vacant: Option<bool>,
    pub hoa: Option<bool>,
    pub owner_type: Option<String>,
    pub purchase_method: Option<String>,
    pub listing_status: Option<String>,
    pub status: PropertyStatus,
    pub months_owned: Option<i32>,
    pub buyer_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
}

/// One sibling-table row carrying an opaque detail payload for a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFactRow {
    pub property_id: Uuid,
    pub kind: FactKind,
    pub payload: serde_json::Value,
}

/// Immutable transaction-ledger row for one deed/recording event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: Uuid,
    pub property_id: Uuid,
    pub buyer_id: Option<Uuid>,
    pub seller_id: Option<Uuid>,
    pub kind: TransactionKind,
    pub recorded_on: NaiveDate,
    pub sale_price: Option<f64>,
    pub notes: Option<String>,
}

/// Application-level natural key for transaction dedup. The recording date,
/// not the sale date, anchors uniqueness so same-day flips stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub property_id: Uuid,
    pub recorded_on: NaiveDate,
    pub kind: TransactionKind,
}

impl TransactionRow {
    pub fn natural_key(&self) -> TransactionKey {
        TransactionKey {
            property_id: self.property_id,
            recorded_on: self.recorded_on,
            kind: self.kind,
        }
    }
}

/// Storage surface the sync pipeline writes through.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Returns the market's watermark, creating a never-synced row on first use.
    async fn read_watermark(&self, market: &str) -> Result<SyncWatermark, StoreError>;

    /// Confirms feed position through `observed_max_sale_date`: persists that
    /// date minus one day, never moving the column backwards. Called after
    /// every fetched page; this is what makes a crashed run resumable.
    async fn advance_watermark(
        &self,
        id: Uuid,
        observed_max_sale_date: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Adds this run's processed count to the running total and refreshes the
    /// attempt timestamp.
    async fn finalize_watermark(&self, id: Uuid, processed: i64) -> Result<(), StoreError>;

    async fn load_companies(&self) -> Result<Vec<Company>, StoreError>;

    async fn find_company_by_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<Company>, StoreError>;

    /// Batch insert with duplicate-name conflicts tolerated as no-ops.
    async fn insert_companies_ignore_conflicts(
        &self,
        companies: &[Company],
    ) -> Result<(), StoreError>;

    async fn update_company_counties(
        &self,
        id: Uuid,
        counties: &[String],
    ) -> Result<(), StoreError>;

    async fn find_properties_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<PropertyRow>, StoreError>;

    async fn insert_properties(&self, rows: &[PropertyRow]) -> Result<(), StoreError>;

    async fn update_property(&self, row: &PropertyRow) -> Result<(), StoreError>;

    /// Drops and rewrites the sibling fact rows for one property.
    async fn replace_property_facts(
        &self,
        property_id: Uuid,
        facts: &[PropertyFactRow],
    ) -> Result<(), StoreError>;

    async fn transactions_for_properties(
        &self,
        property_ids: &[Uuid],
    ) -> Result<Vec<TransactionRow>, StoreError>;

    async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn watermark_from_row(row: &PgRow) -> Result<SyncWatermark, StoreError> {
    Ok(SyncWatermark {
        id: row.try_get("id")?,
        market: row.try_get("market")?,
        last_confirmed_sale_date: row.try_get("last_confirmed_sale_date")?,
        total_records_synced: row.try_get("total_records_synced")?,
        last_sync_attempt_at: row.try_get("last_sync_attempt_at")?,
    })
}

fn company_from_row(row: &PgRow) -> Result<Company, StoreError> {
    Ok(Company {
        id: row.try_get("id")?,
        canonical_name: row.try_get("canonical_name")?,
        counties_serviced: row.try_get("counties_serviced")?,
    })
}

fn property_from_row(row: &PgRow) -> Result<PropertyRow, StoreError> {
    let status_text: String = row.try_get("status")?;
    let status = PropertyStatus::parse(&status_text).ok_or(StoreError::UnknownEnum {
        column: "properties.status",
        value: status_text,
    })?;
    Ok(PropertyRow {
        id: row.try_get("id")?,
        external_property_id: row.try_get("external_property_id")?,
        market: row.try_get("market")?,
        address: row.try_get("address")?,
        county: row.try_get("county")?,
        property_type: row.try_get("property_type")?,
        vacant: row.try_get("vacant")?,
        hoa: row.try_get("hoa")?,
        owner_type: row.try_get("owner_type")?,
        purchase_method: row.try_get("purchase_method")?,
        listing_status: row.try_get("listing_status")?,
        status,
        months_owned: row.try_get("months_owned")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<TransactionRow, StoreError> {
    let kind_text: String = row.try_get("kind")?;
    let kind = TransactionKind::parse(&kind_text).ok_or(StoreError::UnknownEnum {
        column: "transactions.kind",
        value: kind_text,
    })?;
    Ok(TransactionRow {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        kind,
        recorded_on: row.try_get("recorded_on")?,
        sale_price: row.try_get("sale_price")?,
        notes: row.try_get("notes")?,
    })
}

fn confirmed_date(observed_max_sale_date: NaiveDate) -> NaiveDate {
    // One day back tolerates the feed's non-inclusive range semantics and
    // same-day records split across page boundaries.
    observed_max_sale_date - Duration::days(1)
}

#[async_trait]
impl SyncStore for PgStore {
    async fn read_watermark(&self, market: &str) -> Result<SyncWatermark, StoreError> {
        let existing = sqlx::query(
            "SELECT id, market, last_confirmed_sale_date, total_records_synced, last_sync_attempt_at \
             FROM sync_watermarks WHERE market = $1",
        )
        .bind(market)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return watermark_from_row(&row);
        }

        let row = sqlx::query(
            "INSERT INTO sync_watermarks (id, market, total_records_synced, last_sync_attempt_at) \
             VALUES ($1, $2, 0, NOW()) \
             RETURNING id, market, last_confirmed_sale_date, total_records_synced, last_sync_attempt_at",
        )
        .bind(Uuid::new_v4())
        .bind(market)
        .fetch_one(&self.pool)
        .await?;
        watermark_from_row(&row)
    }

    async fn advance_watermark(
        &self,
        id: Uuid,
        observed_max_sale_date: NaiveDate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_watermarks \
             SET last_confirmed_sale_date = GREATEST(COALESCE(last_confirmed_sale_date, $2::date), $2::date), \
                 last_sync_attempt_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(confirmed_date(observed_max_sale_date))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_watermark(&self, id: Uuid, processed: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_watermarks \
             SET total_records_synced = total_records_synced + $2, last_sync_attempt_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(processed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_companies(&self) -> Result<Vec<Company>, StoreError> {
        let rows = sqlx::query("SELECT id, canonical_name, counties_serviced FROM companies")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn find_company_by_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<Company>, StoreError> {
        let row = sqlx::query(
            "SELECT id, canonical_name, counties_serviced FROM companies WHERE canonical_name = $1",
        )
        .bind(canonical_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn insert_companies_ignore_conflicts(
        &self,
        companies: &[Company],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for company in companies {
            sqlx::query(
                "INSERT INTO companies (id, canonical_name, counties_serviced) VALUES ($1, $2, $3) \
                 ON CONFLICT (canonical_name) DO NOTHING",
            )
            .bind(company.id)
            .bind(&company.canonical_name)
            .bind(&company.counties_serviced)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_company_counties(
        &self,
        id: Uuid,
        counties: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE companies SET counties_serviced = $2 WHERE id = $1")
            .bind(id)
            .bind(counties)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_properties_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<PropertyRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, external_property_id, market, address, county, property_type, vacant, hoa, \
                    owner_type, purchase_method, listing_status, status, months_owned, buyer_id, seller_id \
             FROM properties WHERE external_property_id = ANY($1)",
        )
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(property_from_row).collect()
    }

    async fn insert_properties(&self, rows: &[PropertyRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO properties (id, external_property_id, market, address, county, property_type, \
                                         vacant, hoa, owner_type, purchase_method, listing_status, status, \
                                         months_owned, buyer_id, seller_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(row.id)
            .bind(&row.external_property_id)
            .bind(&row.market)
            .bind(&row.address)
            .bind(&row.county)
            .bind(&row.property_type)
            .bind(row.vacant)
            .bind(row.hoa)
            .bind(&row.owner_type)
            .bind(&row.purchase_method)
            .bind(&row.listing_status)
            .bind(row.status.as_str())
            .bind(row.months_owned)
            .bind(row.buyer_id)
            .bind(row.seller_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_property(&self, row: &PropertyRow) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE properties \
             SET market = $2, address = $3, county = $4, property_type = $5, vacant = $6, hoa = $7, \
                 owner_type = $8, purchase_method = $9, listing_status = $10, status = $11, \
                 months_owned = $12, buyer_id = $13, seller_id = $14 \
             WHERE id = $1",
        )
        .bind(row.id)
        .bind(&row.market)
        .bind(&row.address)
        .bind(&row.county)
        .bind(&row.property_type)
        .bind(row.vacant)
        .bind(row.hoa)
        .bind(&row.owner_type)
        .bind(&row.purchase_method)
        .bind(&row.listing_status)
        .bind(row.status.as_str())
        .bind(row.months_owned)
        .bind(row.buyer_id)
        .bind(row.seller_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_property_facts(
        &self,
        property_id: Uuid,
        facts: &[PropertyFactRow],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM property_facts WHERE property_id = $1")
            .bind(property_id)
            .execute(&mut *tx)
            .await?;
        for fact in facts {
            sqlx::query(
                "INSERT INTO property_facts (id, property_id, kind, payload) VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(fact.property_id)
            .bind(fact.kind.as_str())
            .bind(&fact.payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transactions_for_properties(
        &self,
        property_ids: &[Uuid],
    ) -> Result<Vec<TransactionRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, property_id, buyer_id, seller_id, kind, recorded_on, sale_price, notes \
             FROM transactions WHERE property_id = ANY($1)",
        )
        .bind(property_ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO transactions (id, property_id, buyer_id, seller_id, kind, recorded_on, sale_price, notes) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(row.id)
            .bind(row.property_id)
            .bind(row.buyer_id)
            .bind(row.seller_id)
            .bind(row.kind.as_str())
            .bind(row.recorded_on)
            .bind(row.sale_price)
            .bind(&row.notes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation

#[derive(Default)]
struct MemoryInner {
    watermarks: HashMap<String, SyncWatermark>,
    companies: Vec<Company>,
    properties: Vec<PropertyRow>,
    facts: HashMap<Uuid, Vec<PropertyFactRow>>,
    transactions: Vec<TransactionRow>,
    failing_company_inserts: usize,
}

/// In-memory `SyncStore` with the same observable semantics as the Postgres
/// store. Backs the pipeline tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` company batch inserts fail, to exercise the
    /// per-company re-lookup fallback.
    pub async fn fail_next_company_inserts(&self, n: usize) {
        self.inner.lock().await.failing_company_inserts = n;
    }

    pub async fn watermark(&self, market: &str) -> Option<SyncWatermark> {
        self.inner.lock().await.watermarks.get(market).cloned()
    }

    pub async fn companies(&self) -> Vec<Company> {
        self.inner.lock().await.companies.clone()
    }

    pub async fn properties(&self) -> Vec<PropertyRow> {
        self.inner.lock().await.properties.clone()
    }

    pub async fn transactions(&self) -> Vec<TransactionRow> {
        self.inner.lock().await.transactions.clone()
    }

    pub async fn facts_for(&self, property_id: Uuid) -> Vec<PropertyFactRow> {
        self.inner
            .lock()
            .await
            .facts
            .get(&property_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn read_watermark(&self, market: &str) -> Result<SyncWatermark, StoreError> {
        let mut inner = self.inner.lock().await;
        let watermark = inner
            .watermarks
            .entry(market.to_string())
            .or_insert_with(|| SyncWatermark {
                id: Uuid::new_v4(),
                market: market.to_string(),
                last_confirmed_sale_date: None,
                total_records_synced: 0,
                last_sync_attempt_at: Some(Utc::now()),
            });
        Ok(watermark.clone())
    }

    async fn advance_watermark(
        &self,
        id: Uuid,
        observed_max_sale_date: NaiveDate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let confirmed = confirmed_date(observed_max_sale_date);
        for watermark in inner.watermarks.values_mut() {
            if watermark.id == id {
                watermark.last_confirmed_sale_date = Some(
                    watermark
                        .last_confirmed_sale_date
                        .map_or(confirmed, |current| current.max(confirmed)),
                );
                watermark.last_sync_attempt_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn finalize_watermark(&self, id: Uuid, processed: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for watermark in inner.watermarks.values_mut() {
            if watermark.id == id {
                watermark.total_records_synced += processed;
                watermark.last_sync_attempt_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn load_companies(&self) -> Result<Vec<Company>, StoreError> {
        Ok(self.inner.lock().await.companies.clone())
    }

    async fn find_company_by_name(
        &self,
        canonical_name: &str,
    ) -> Result<Option<Company>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .companies
            .iter()
            .find(|company| company.canonical_name == canonical_name)
            .cloned())
    }

    async fn insert_companies_ignore_conflicts(
        &self,
        companies: &[Company],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.failing_company_inserts > 0 {
            inner.failing_company_inserts -= 1;
            return Err(StoreError::Unavailable(
                "scripted company insert failure".to_string(),
            ));
        }
        for company in companies {
            let exists = inner
                .companies
                .iter()
                .any(|existing| existing.canonical_name == company.canonical_name);
            if !exists {
                inner.companies.push(company.clone());
            }
        }
        Ok(())
    }

    async fn update_company_counties(
        &self,
        id: Uuid,
        counties: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for company in inner.companies.iter_mut() {
            if company.id == id {
                company.counties_serviced = counties.to_vec();
            }
        }
        Ok(())
    }

    async fn find_properties_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> Result<Vec<PropertyRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .properties
            .iter()
            .filter(|row| external_ids.contains(&row.external_property_id))
            .cloned()
            .collect())
    }

    async fn insert_properties(&self, rows: &[PropertyRow]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for row in rows {
            let exists = inner
                .properties
                .iter()
                .any(|existing| existing.external_property_id == row.external_property_id);
            if !exists {
                inner.properties.push(row.clone());
            }
        }
        Ok(())
    }

    async fn update_property(&self, row: &PropertyRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for existing in inner.properties.iter_mut() {
            if existing.id == row.id {
                *existing = row.clone();
            }
        }
        Ok(())
    }

    async fn replace_property_facts(
        &self,
        property_id: Uuid,
        facts: &[PropertyFactRow],
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .facts
            .insert(property_id, facts.to_vec());
        Ok(())
    }

    async fn transactions_for_properties(
        &self,
        property_ids: &[Uuid],
    ) -> Result<Vec<TransactionRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .transactions
            .iter()
            .filter(|row| property_ids.contains(&row.property_id))
            .cloned()
            .collect())
    }

    async fn insert_transactions(&self, rows: &[TransactionRow]) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .transactions
            .extend(rows.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn read_watermark_creates_never_synced_row() {
        let store = MemoryStore::new();
        let watermark = store.read_watermark("phoenix-az").await.unwrap();
        assert_eq!(watermark.market, "phoenix-az");
        assert!(watermark.last_confirmed_sale_date.is_none());
        assert_eq!(watermark.total_records_synced, 0);

        let again = store.read_watermark("phoenix-az").await.unwrap();
        assert_eq!(again.id, watermark.id);
    }

    #[tokio::test]
    async fn advance_sets_observed_minus_one_day_and_never_regresses() {
        let store = MemoryStore::new();
        let watermark = store.read_watermark("phoenix-az").await.unwrap();

        store
            .advance_watermark(watermark.id, date(2026, 1, 20))
            .await
            .unwrap();
        assert_eq!(
            store.watermark("phoenix-az").await.unwrap().last_confirmed_sale_date,
            Some(date(2026, 1, 19))
        );

        // An older observation must not move the watermark backwards.
        store
            .advance_watermark(watermark.id, date(2026, 1, 10))
            .await
            .unwrap();
        assert_eq!(
            store.watermark("phoenix-az").await.unwrap().last_confirmed_sale_date,
            Some(date(2026, 1, 19))
        );

        store
            .advance_watermark(watermark.id, date(2026, 2, 1))
            .await
            .unwrap();
        assert_eq!(
            store.watermark("phoenix-az").await.unwrap().last_confirmed_sale_date,
            Some(date(2026, 1, 31))
        );
    }

    #[tokio::test]
    async fn finalize_accumulates_processed_counts() {
        let store = MemoryStore::new();
        let watermark = store.read_watermark("tucson-az").await.unwrap();
        store.finalize_watermark(watermark.id, 12).await.unwrap();
        store.finalize_watermark(watermark.id, 5).await.unwrap();
        assert_eq!(
            store.watermark("tucson-az").await.unwrap().total_records_synced,
            17
        );
    }

    #[tokio::test]
    async fn duplicate_company_names_insert_as_noop() {
        let store = MemoryStore::new();
        let first = Company {
            id: Uuid::new_v4(),
            canonical_name: "Blue Door Capital LLC".to_string(),
            counties_serviced: vec!["Maricopa".to_string()],
        };
        let duplicate = Company {
            id: Uuid::new_v4(),
            canonical_name: "Blue Door Capital LLC".to_string(),
            counties_serviced: vec![],
        };
        store
            .insert_companies_ignore_conflicts(&[first.clone(), duplicate])
            .await
            .unwrap();

        let companies = store.companies().await;
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].id, first.id);
    }

    #[tokio::test]
    async fn company_county_membership_is_case_insensitive() {
        let company = Company {
            id: Uuid::new_v4(),
            canonical_name: "Sunrise Properties".to_string(),
            counties_serviced: vec!["Maricopa".to_string()],
        };
        assert!(company.services_county("MARICOPA"));
        assert!(company.services_county("Maricopa County"));
        assert!(!company.services_county("Pima"));
    }

    #[tokio::test]
    async fn transaction_lookup_scopes_to_requested_properties() {
        let store = MemoryStore::new();
        let property_a = Uuid::new_v4();
        let property_b = Uuid::new_v4();
        let row = |property_id, day| TransactionRow {
            id: Uuid::new_v4(),
            property_id,
            buyer_id: None,
            seller_id: None,
            kind: TransactionKind::Acquisition,
            recorded_on: date(2026, 1, day),
            sale_price: None,
            notes: None,
        };
        store
            .insert_transactions(&[row(property_a, 5), row(property_a, 6), row(property_b, 7)])
            .await
            .unwrap();

        let found = store
            .transactions_for_properties(&[property_a])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|t| t.property_id == property_a));
    }

    #[tokio::test]
    async fn replace_facts_rewrites_the_sibling_rows() {
        let store = MemoryStore::new();
        let property_id = Uuid::new_v4();
        let fact = |payload: serde_json::Value| PropertyFactRow {
            property_id,
            kind: FactKind::Assessment,
            payload,
        };
        store
            .replace_property_facts(property_id, &[fact(serde_json::json!({"year": 2024}))])
            .await
            .unwrap();
        store
            .replace_property_facts(property_id, &[fact(serde_json::json!({"year": 2025}))])
            .await
            .unwrap();

        let facts = store.facts_for(property_id).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].payload["year"], 2025);
    }
}
