//! In-memory record collections.
//!
//! Each collection is an ordered list of JSON objects behind its own
//! async lock. The set of collections is fixed when the store is built.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::Collection;
use crate::error::{MockError, Result};
use crate::template::TemplateRenderer;

/// A schema-less record. The `name` field identifies it on element routes.
pub type Record = Map<String, Value>;

/// Field used to look up single records.
pub const ID_FIELD: &str = "name";

/// Lookup failures, surfaced as 404.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// No collection with this name.
    #[error("collection {0} not found")]
    UnknownCollection(String),

    /// No record with this id in the collection.
    #[error("record {id} not found in {collection}")]
    RecordNotFound {
        /// Collection name.
        collection: String,
        /// Requested id.
        id: String,
    },
}

/// Per-collection record lists.
#[derive(Debug, Default)]
pub struct RecordStore {
    collections: HashMap<String, RwLock<Vec<Record>>>,
}

impl RecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store for `collections`, seeding each from its sample.
    ///
    /// The sample is rendered once per seeded record so helpers such as
    /// `{{uuid}}` yield distinct values.
    pub fn seeded(collections: &[Collection], renderer: &dyn TemplateRenderer) -> Result<Self> {
        let mut store = Self::new();
        for collection in collections {
            let records = seed_records(collection, renderer)?;
            debug!(
                collection = %collection.name,
                records = records.len(),
                "Seeded collection"
            );
            store.insert_collection(&collection.name, records);
        }
        Ok(store)
    }

    /// Add or replace a collection.
    pub fn insert_collection(&mut self, name: &str, records: Vec<Record>) {
        self.collections
            .insert(name.to_string(), RwLock::new(records));
    }

    /// Whether a collection exists.
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    fn collection(&self, name: &str) -> Result<&RwLock<Vec<Record>>, StoreError> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    /// List records, keeping those that agree with every non-empty filter.
    ///
    /// A record lacking a filtered field is kept.
    pub async fn list(
        &self,
        name: &str,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Record>, StoreError> {
        let records = self.collection(name)?.read().await;
        Ok(records
            .iter()
            .filter(|record| matches_filters(record, filters))
            .cloned()
            .collect())
    }

    /// Append a record.
    pub async fn create(&self, name: &str, record: Record) -> Result<(), StoreError> {
        self.collection(name)?.write().await.push(record);
        Ok(())
    }

    /// First record whose `name` equals `id`.
    pub async fn get(&self, name: &str, id: &str) -> Result<Record, StoreError> {
        let records = self.collection(name)?.read().await;
        records
            .iter()
            .find(|record| has_id(record, id))
            .cloned()
            .ok_or_else(|| not_found(name, id))
    }

    /// Replace the first record whose `name` equals `id`.
    pub async fn update(&self, name: &str, id: &str, record: Record) -> Result<(), StoreError> {
        let mut records = self.collection(name)?.write().await;
        let slot = records
            .iter_mut()
            .find(|existing| has_id(existing, id))
            .ok_or_else(|| not_found(name, id))?;
        *slot = record;
        Ok(())
    }

    /// Remove the first record whose `name` equals `id`, preserving the
    /// order of the rest.
    pub async fn delete(&self, name: &str, id: &str) -> Result<Record, StoreError> {
        let mut records = self.collection(name)?.write().await;
        let index = records
            .iter()
            .position(|record| has_id(record, id))
            .ok_or_else(|| not_found(name, id))?;
        Ok(records.remove(index))
    }

    /// Copy of every collection, for template contexts.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<Record>> {
        let mut snapshot = BTreeMap::new();
        for (name, records) in &self.collections {
            snapshot.insert(name.clone(), records.read().await.clone());
        }
        snapshot
    }
}

fn seed_records(collection: &Collection, renderer: &dyn TemplateRenderer) -> Result<Vec<Record>> {
    if collection.sample.trim().is_empty() {
        return Ok(Vec::new());
    }

    let name = format!("{} sample", collection.name);
    (0..collection.init_count)
        .map(|_| {
            let text = renderer.render(&name, &collection.sample, &Value::Null)?;
            serde_json::from_str::<Record>(&text).map_err(|e| {
                MockError::InvalidConfig(format!(
                    "sample of collection {} is not a JSON object: {e}",
                    collection.name
                ))
            })
        })
        .collect()
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::RecordNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn has_id(record: &Record, id: &str) -> bool {
    matches!(record.get(ID_FIELD), Some(Value::String(value)) if value == id)
}

fn matches_filters(record: &Record, filters: &HashMap<String, String>) -> bool {
    filters
        .iter()
        .filter(|(_, expected)| !expected.is_empty())
        .all(|(field, expected)| match record.get(field) {
            None => true,
            Some(Value::String(value)) => value == expected,
            Some(other) => other.to_string() == *expected,
        })
}
