use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, RngCore};
use serde_json::Value;

use mockalchemy_core::{Record, Relations};

/// Valid values per foreign-key field of the collection being seeded.
pub type FkPools = BTreeMap<String, Vec<Value>>;

/// Referenced-field values of collections already seeded in one pass.
///
/// Only fields that some relation references are retained.
#[derive(Debug, Default)]
pub struct KeyIndex {
    referenced: BTreeMap<String, BTreeSet<String>>,
    values: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

impl KeyIndex {
    /// Build an index that remembers every field referenced by the given relations.
    pub fn for_relations<'a, I>(relations: I) -> Self
    where
        I: IntoIterator<Item = &'a Relations>,
    {
        let mut referenced: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for relations in relations {
            for relation in relations.values().filter(|relation| relation.is_belongs_to()) {
                referenced
                    .entry(relation.target.clone())
                    .or_default()
                    .insert(relation.references.clone());
            }
        }
        Self {
            referenced,
            values: BTreeMap::new(),
        }
    }

    /// Record the referenced-field values of a seeded collection, replacing earlier ones.
    pub fn ingest(&mut self, collection: &str, records: &[Record]) {
        let Some(fields) = self.referenced.get(collection) else {
            return;
        };

        let mut columns: BTreeMap<String, Vec<Value>> = fields
            .iter()
            .map(|field| (field.clone(), Vec::with_capacity(records.len())))
            .collect();
        for record in records {
            for (field, values) in columns.iter_mut() {
                if let Some(value) = record.get(field).filter(|value| !value.is_null()) {
                    values.push(value.clone());
                }
            }
        }

        self.values.insert(collection.to_string(), columns);
    }

    pub fn values(&self, collection: &str, field: &str) -> Option<&[Value]> {
        self.values
            .get(collection)
            .and_then(|columns| columns.get(field))
            .map(Vec::as_slice)
    }

    /// Pools for every belongsTo relation of a collection.
    ///
    /// A target that was never ingested yields an empty pool, so no value can
    /// be accepted for that foreign key.
    pub fn pools_for(&self, relations: &Relations) -> FkPools {
        relations
            .values()
            .filter(|relation| relation.is_belongs_to())
            .map(|relation| {
                let values = self
                    .values(&relation.target, &relation.references)
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                (relation.foreign_key.clone(), values)
            })
            .collect()
    }
}

/// Force every foreign-key value present on `records` into its pool.
///
/// Values outside the pool are replaced by a random pool member; with an empty
/// pool the field is removed. Returns how many values were rewritten.
pub fn enforce_pools(records: &mut [Record], pools: &FkPools, rng: &mut dyn RngCore) -> usize {
    let mut repaired = 0;
    for (field, pool) in pools {
        for record in records.iter_mut() {
            let Some(current) = record.get(field) else {
                continue;
            };
            if pool.contains(current) {
                continue;
            }
            if pool.is_empty() {
                record.remove(field);
            } else {
                let index = rng.random_range(0..pool.len());
                record.insert(field.clone(), pool[index].clone());
            }
            repaired += 1;
        }
    }
    repaired
}
