//! Product and analysis persistence.
//!
//! Provides the `AnalysisStore` trait with in-memory and JSON-file
//! implementations. Analyses are kept as an append-only history per
//! product; "latest" is the record with the highest insertion sequence,
//! never the newest timestamp.

use chrono::{DateTime, Utc};
use labelscan_model::{AnalysisPayload, ModelError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Payload(#[from] ModelError),

    #[error("Unknown product id: {0}")]
    UnknownProduct(u64),

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Lifecycle status of a product record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    /// Created from a user scan, not yet reviewed
    Pending,
}

/// Which kind of scan produced a scan log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Barcode,
    Label,
}

/// A product keyed by barcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub barcode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub source: String,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert-or-update request for a product.
///
/// On update only the fields that are `Some` overwrite stored values.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpsert {
    pub barcode: String,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub source: Option<String>,
    pub status: Option<ProductStatus>,
}

impl ProductUpsert {
    pub fn new(barcode: impl Into<String>) -> Self {
        Self {
            barcode: barcode.into(),
            name: None,
            brand: None,
            source: None,
            status: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_brand(mut self, brand: Option<String>) -> Self {
        self.brand = brand;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// One stored analysis of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Insertion sequence, unique across all products
    pub id: u64,
    pub product_id: u64,
    pub raw_text: String,
    /// Serialized `AnalysisPayload`, stored verbatim
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Decode the stored payload.
    pub fn payload(&self) -> Result<AnalysisPayload, StoreError> {
        Ok(AnalysisPayload::from_json(&self.payload)?)
    }
}

/// One entry of the scan log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub scan_type: ScanType,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Trait for product/analysis stores.
///
/// Implementations must keep analyses append-only.
pub trait AnalysisStore {
    /// Insert a product by barcode, or update the supplied fields of an existing one.
    fn upsert_product(
        &self,
        upsert: ProductUpsert,
    ) -> impl Future<Output = Result<Product, StoreError>> + Send;

    fn product_by_barcode(
        &self,
        barcode: &str,
    ) -> impl Future<Output = Result<Option<Product>, StoreError>> + Send;

    /// Append a new analysis for a product.
    fn save_analysis(
        &self,
        product_id: u64,
        payload: &AnalysisPayload,
    ) -> impl Future<Output = Result<AnalysisRecord, StoreError>> + Send;

    /// Most recently inserted analysis for a product.
    fn latest_analysis(
        &self,
        product_id: u64,
    ) -> impl Future<Output = Result<Option<AnalysisRecord>, StoreError>> + Send;

    /// All analyses for a product, oldest first.
    fn history(
        &self,
        product_id: u64,
    ) -> impl Future<Output = Result<Vec<AnalysisRecord>, StoreError>> + Send;

    fn log_scan(
        &self,
        barcode: Option<&str>,
        scan_type: ScanType,
        result: serde_json::Value,
    ) -> impl Future<Output = Result<ScanRecord, StoreError>> + Send;

    /// Get the store name for logging.
    fn name(&self) -> &'static str;
}

/// Everything a store holds. Sequences only ever grow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    product_seq: u64,
    #[serde(default)]
    analysis_seq: u64,
    #[serde(default)]
    scan_seq: u64,
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    analyses: Vec<AnalysisRecord>,
    #[serde(default)]
    scans: Vec<ScanRecord>,
}

impl State {
    fn upsert_product(&mut self, upsert: ProductUpsert, now: DateTime<Utc>) -> Product {
        if let Some(existing) = self.products.iter_mut().find(|p| p.barcode == upsert.barcode) {
            if upsert.name.is_some() {
                existing.name = upsert.name;
            }
            if upsert.brand.is_some() {
                existing.brand = upsert.brand;
            }
            if let Some(source) = upsert.source {
                existing.source = source;
            }
            if let Some(status) = upsert.status {
                existing.status = status;
            }
            return existing.clone();
        }

        self.product_seq += 1;
        let product = Product {
            id: self.product_seq,
            barcode: upsert.barcode,
            name: upsert.name,
            brand: upsert.brand,
            source: upsert.source.unwrap_or_else(|| "seed".to_string()),
            status: upsert.status.unwrap_or(ProductStatus::Active),
            created_at: now,
        };
        self.products.push(product.clone());
        product
    }

    fn product_by_barcode(&self, barcode: &str) -> Option<Product> {
        self.products.iter().find(|p| p.barcode == barcode).cloned()
    }

    fn save_analysis(
        &mut self,
        product_id: u64,
        raw_text: String,
        payload: String,
        now: DateTime<Utc>,
    ) -> Result<AnalysisRecord, StoreError> {
        if !self.products.iter().any(|p| p.id == product_id) {
            return Err(StoreError::UnknownProduct(product_id));
        }

        self.analysis_seq += 1;
        let record = AnalysisRecord {
            id: self.analysis_seq,
            product_id,
            raw_text,
            payload,
            created_at: now,
        };
        self.analyses.push(record.clone());
        Ok(record)
    }

    fn latest_analysis(&self, product_id: u64) -> Option<AnalysisRecord> {
        self.analyses
            .iter()
            .filter(|r| r.product_id == product_id)
            .max_by_key(|r| r.id)
            .cloned()
    }

    fn history(&self, product_id: u64) -> Vec<AnalysisRecord> {
        let mut records: Vec<_> = self
            .analyses
            .iter()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn log_scan(
        &mut self,
        barcode: Option<String>,
        scan_type: ScanType,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> ScanRecord {
        self.scan_seq += 1;
        let record = ScanRecord {
            id: self.scan_seq,
            barcode,
            scan_type,
            result,
            created_at: now,
        };
        self.scans.push(record.clone());
        record
    }
}

/// Volatile store, mainly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan log, oldest first.
    pub async fn scans(&self) -> Vec<ScanRecord> {
        self.state.read().await.scans.clone()
    }
}

impl AnalysisStore for MemoryStore {
    async fn upsert_product(&self, upsert: ProductUpsert) -> Result<Product, StoreError> {
        Ok(self.state.write().await.upsert_product(upsert, Utc::now()))
    }

    async fn product_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.state.read().await.product_by_barcode(barcode))
    }

    async fn save_analysis(
        &self,
        product_id: u64,
        payload: &AnalysisPayload,
    ) -> Result<AnalysisRecord, StoreError> {
        let json = payload.to_json()?;
        self.state.write().await.save_analysis(
            product_id,
            payload.raw_text.clone(),
            json,
            Utc::now(),
        )
    }

    async fn latest_analysis(&self, product_id: u64) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.state.read().await.latest_analysis(product_id))
    }

    async fn history(&self, product_id: u64) -> Result<Vec<AnalysisRecord>, StoreError> {
        Ok(self.state.read().await.history(product_id))
    }

    async fn log_scan(
        &self,
        barcode: Option<&str>,
        scan_type: ScanType,
        result: serde_json::Value,
    ) -> Result<ScanRecord, StoreError> {
        Ok(self
            .state
            .write()
            .await
            .log_scan(barcode.map(str::to_string), scan_type, result, Utc::now()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// JSON file store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the JSON document holding all records
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("labelscan.json"),
        }
    }
}

/// Store persisted as a single JSON document.
///
/// Every operation takes an advisory lock on a `.lock` sibling file and
/// re-reads the document, so several handles or processes may share one
/// path. Writes go to a `.tmp` sibling which is then renamed over the
/// document; a failed write leaves the document unchanged.
pub struct JsonFileStore {
    config: StoreConfig,
}

impl JsonFileStore {
    /// Open the store, starting empty if the file does not exist yet.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let store = Self { config };
        let products = store.read(|state| state.products.len()).await?;

        tracing::debug!(path = %store.path().display(), products, "Opened store file");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Run `view` against the current document under a shared lock.
    async fn read<T, F>(&self, view: F) -> Result<T, StoreError>
    where
        F: FnOnce(&State) -> T + Send + 'static,
        T: Send + 'static,
    {
        let path = self.config.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let lock = open_lock(&path)?;
            let _guard = lock.read().map_err(io_error(&lock_path(&path)))?;
            let state = load_state(&path)?;
            Ok(view(&state))
        })
        .await?
    }

    /// Apply `mutate` to the current document and persist it, all under an
    /// exclusive lock.
    async fn commit<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut State) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.config.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StoreError> {
            let mut lock = open_lock(&path)?;
            let _guard = lock.write().map_err(io_error(&lock_path(&path)))?;
            let mut state = load_state(&path)?;
            let out = mutate(&mut state)?;
            save_state(&path, &state)?;
            Ok(out)
        })
        .await?
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn lock_path(path: &Path) -> PathBuf {
    sibling(path, ".lock")
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn open_lock(path: &Path) -> Result<fd_lock::RwLock<File>, StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let lock_path = lock_path(path);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(io_error(&lock_path))?;
    Ok(fd_lock::RwLock::new(file))
}

fn load_state(path: &Path) -> Result<State, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(State::default()),
        Err(source) => Err(io_error(path)(source)),
    }
}

fn save_state(path: &Path, state: &State) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let tmp = sibling(path, ".tmp");

    std::fs::write(&tmp, bytes).map_err(io_error(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io_error(path))?;

    tracing::debug!(
        path = %path.display(),
        products = state.products.len(),
        analyses = state.analyses.len(),
        "Persisted store"
    );
    Ok(())
}

impl AnalysisStore for JsonFileStore {
    async fn upsert_product(&self, upsert: ProductUpsert) -> Result<Product, StoreError> {
        let now = Utc::now();
        self.commit(move |state| Ok(state.upsert_product(upsert, now)))
            .await
    }

    async fn product_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        let barcode = barcode.to_string();
        self.read(move |state| state.product_by_barcode(&barcode))
            .await
    }

    async fn save_analysis(
        &self,
        product_id: u64,
        payload: &AnalysisPayload,
    ) -> Result<AnalysisRecord, StoreError> {
        let now = Utc::now();
        let raw_text = payload.raw_text.clone();
        let json = payload.to_json()?;
        let record = self
            .commit(move |state| state.save_analysis(product_id, raw_text, json, now))
            .await?;
        tracing::debug!(product_id, analysis_id = record.id, "Saved analysis");
        Ok(record)
    }

    async fn latest_analysis(&self, product_id: u64) -> Result<Option<AnalysisRecord>, StoreError> {
        self.read(move |state| state.latest_analysis(product_id))
            .await
    }

    async fn history(&self, product_id: u64) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.read(move |state| state.history(product_id)).await
    }

    async fn log_scan(
        &self,
        barcode: Option<&str>,
        scan_type: ScanType,
        result: serde_json::Value,
    ) -> Result<ScanRecord, StoreError> {
        let now = Utc::now();
        let barcode = barcode.map(str::to_string);
        self.commit(move |state| Ok(state.log_scan(barcode, scan_type, result, now)))
            .await
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelscan_analyze::analyze;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_upsert_inserts_then_coalesces() {
        let store = MemoryStore::new();

        let created = store
            .upsert_product(
                ProductUpsert::new("4006381333931")
                    .with_source("user_scan")
                    .with_status(ProductStatus::Pending),
            )
            .await
            .unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.name, None);
        assert_eq!(created.status, ProductStatus::Pending);

        let updated = store
            .upsert_product(
                ProductUpsert::new("4006381333931").with_name(Some("Choco Spread".into())),
            )
            .await
            .unwrap();
        assert_eq!(updated.id, 1);
        assert_eq!(updated.name.as_deref(), Some("Choco Spread"));
        assert_eq!(updated.source, "user_scan");
        assert_eq!(updated.status, ProductStatus::Pending);

        let seeded = store
            .upsert_product(ProductUpsert::new("5000112548167"))
            .await
            .unwrap();
        assert_eq!(seeded.id, 2);
        assert_eq!(seeded.source, "seed");
        assert_eq!(seeded.status, ProductStatus::Active);
    }

    #[tokio::test]
    async fn test_latest_is_highest_sequence() {
        let store = MemoryStore::new();
        let product = store
            .upsert_product(ProductUpsert::new("123"))
            .await
            .unwrap();

        assert!(store.latest_analysis(product.id).await.unwrap().is_none());

        let first = analyze("Sugar, Salt");
        let second = analyze("Water, Natural Flavor");
        store.save_analysis(product.id, &first).await.unwrap();
        store.save_analysis(product.id, &second).await.unwrap();

        let latest = store.latest_analysis(product.id).await.unwrap().unwrap();
        assert_eq!(latest.id, 2);
        assert_eq!(latest.payload().unwrap(), second);

        let history = store.history(product.id).await.unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(history[0].raw_text, "Sugar, Salt");
    }

    #[tokio::test]
    async fn test_history_is_per_product() {
        let store = MemoryStore::new();
        let a = store.upsert_product(ProductUpsert::new("a")).await.unwrap();
        let b = store.upsert_product(ProductUpsert::new("b")).await.unwrap();

        store.save_analysis(a.id, &analyze("Sugar")).await.unwrap();
        store.save_analysis(b.id, &analyze("Salt")).await.unwrap();
        store.save_analysis(a.id, &analyze("Milk")).await.unwrap();

        let history = store.history(a.id).await.unwrap();
        let ids: Vec<_> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.latest_analysis(b.id).await.unwrap().unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_save_for_unknown_product() {
        let store = MemoryStore::new();
        let result = store.save_analysis(42, &analyze("Sugar")).await;
        assert!(matches!(result, Err(StoreError::UnknownProduct(42))));
    }

    #[tokio::test]
    async fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            path: dir.path().join("nested").join("store.json"),
        };

        let payload = analyze("Wheat Flour (enriched), Sugar [cane], Palm Oil");
        {
            let store = JsonFileStore::open(config.clone()).await.unwrap();
            let product = store
                .upsert_product(ProductUpsert::new("777").with_name(Some("Crackers".into())))
                .await
                .unwrap();
            store.save_analysis(product.id, &payload).await.unwrap();
            store
                .log_scan(Some("777"), ScanType::Label, serde_json::json!({"ok": true}))
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(config).await.unwrap();
        let product = reopened.product_by_barcode("777").await.unwrap().unwrap();
        assert_eq!(product.name.as_deref(), Some("Crackers"));

        let latest = reopened.latest_analysis(product.id).await.unwrap().unwrap();
        assert_eq!(latest.payload().unwrap(), payload);

        let scan = reopened
            .log_scan(None, ScanType::Barcode, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(scan.id, 2);
    }

    #[tokio::test]
    async fn test_two_handles_share_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store.json"),
        };

        let first = JsonFileStore::open(config.clone()).await.unwrap();
        let second = JsonFileStore::open(config.clone()).await.unwrap();

        let product = first.upsert_product(ProductUpsert::new("42")).await.unwrap();
        assert_eq!(
            second.product_by_barcode("42").await.unwrap().map(|p| p.id),
            Some(product.id)
        );

        let a = first.save_analysis(product.id, &analyze("Sugar")).await.unwrap();
        let b = second.save_analysis(product.id, &analyze("Salt")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));

        let reopened = JsonFileStore::open(config).await.unwrap();
        let history = reopened.history(product.id).await.unwrap();
        let raw: Vec<_> = history.iter().map(|r| r.raw_text.as_str()).collect();
        assert_eq!(raw, vec!["Sugar", "Salt"]);
        assert_eq!(first.latest_analysis(product.id).await.unwrap().unwrap().id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            path: dir.path().join("store.json"),
        };
        let setup = JsonFileStore::open(config.clone()).await.unwrap();
        let product = setup.upsert_product(ProductUpsert::new("42")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let config = config.clone();
            let product_id = product.id;
            tasks.push(tokio::spawn(async move {
                let store = JsonFileStore::open(config).await.unwrap();
                let payload = analyze(&format!("Sugar, Batch {i}"));
                store.save_analysis(product_id, &payload).await.unwrap().id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
        assert_eq!(setup.history(product.id).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        let result = JsonFileStore::open(StoreConfig { path }).await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
