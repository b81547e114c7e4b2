//! Versioned property bundles.
//!
//! A resource carries extra state as a mapping from a property tag (e.g.
//! `nodes.v2`, `state.v1`) to a versioned JSON record. Readers ask for a
//! typed record by tag; unknown tags materialize the record's default.
//! Newer schema versions migrate lazily: a read of `vN+1` falls back to
//! `vN`, maps the fields across, and writes the new version; the old
//! record stays in place as a legacy copy.

use std::collections::HashMap;

use safescale_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A versioned record stored in a [`PropertyBag`] under a fixed tag.
pub trait Property: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The tag the record is stored under, e.g. `nodes.v2`.
    const TAG: &'static str;
}

/// A mapping from property tag to versioned JSON record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag {
    records: HashMap<String, serde_json::Value>,
}

impl PropertyBag {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record exists under `tag`.
    #[must_use]
    pub fn lookup(&self, tag: &str) -> bool {
        self.records.contains_key(tag)
    }

    /// Read the record of type `P`, materializing its default when the tag
    /// is absent.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` when the stored record does not decode as `P`.
    pub fn get<P: Property>(&self) -> Result<P> {
        match self.records.get(P::TAG) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| Error::syntax(format!("failed to decode property '{}': {e}", P::TAG))),
            None => Ok(P::default()),
        }
    }

    /// Drop the record stored under `tag`, if any.
    pub fn remove(&mut self, tag: &str) {
        self.records.remove(tag);
    }

    /// Store `record` under its tag.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` when the record does not serialize.
    pub fn set<P: Property>(&mut self, record: &P) -> Result<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| Error::syntax(format!("failed to encode property '{}': {e}", P::TAG)))?;
        self.records.insert(P::TAG.to_string(), value);
        Ok(())
    }

    /// Read a `New` record, migrating from `Old` on first read.
    ///
    /// When `New::TAG` is absent but `Old::TAG` exists, the old record is
    /// mapped through `migrate` and the result written under the new tag;
    /// the old record remains as a legacy copy. When both are absent the
    /// default `New` materializes without being written.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on a record that does not decode or encode.
    pub fn get_or_migrate<New, Old>(
        &mut self,
        migrate: impl FnOnce(&Old) -> New,
    ) -> Result<New>
    where
        New: Property,
        Old: Property,
    {
        if self.lookup(New::TAG) {
            return self.get::<New>();
        }
        if self.lookup(Old::TAG) {
            let old = self.get::<Old>()?;
            let migrated = migrate(&old);
            self.set(&migrated)?;
            return Ok(migrated);
        }
        Ok(New::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct SizingV1 {
        cores: u32,
        disk_size: u32,
    }

    impl Property for SizingV1 {
        const TAG: &'static str = "sizing.v1";
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct SizingV2 {
        min_cores: u32,
        min_disk_size: u32,
    }

    impl Property for SizingV2 {
        const TAG: &'static str = "sizing.v2";
    }

    #[test]
    fn absent_tag_materializes_default() {
        let bag = PropertyBag::new();
        assert!(!bag.lookup(SizingV1::TAG));
        assert_eq!(bag.get::<SizingV1>().unwrap(), SizingV1::default());
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut bag = PropertyBag::new();
        let v1 = SizingV1 { cores: 4, disk_size: 100 };
        bag.set(&v1).unwrap();
        assert!(bag.lookup(SizingV1::TAG));
        assert_eq!(bag.get::<SizingV1>().unwrap(), v1);
    }

    #[test]
    fn migration_happens_once_and_keeps_legacy() {
        let mut bag = PropertyBag::new();
        bag.set(&SizingV1 { cores: 8, disk_size: 200 }).unwrap();

        let v2 = bag
            .get_or_migrate::<SizingV2, SizingV1>(|old| SizingV2 {
                min_cores: old.cores,
                min_disk_size: old.disk_size,
            })
            .unwrap();
        assert_eq!(v2.min_cores, 8);

        // The legacy record stays, the new version is now direct.
        assert!(bag.lookup(SizingV1::TAG));
        assert!(bag.lookup(SizingV2::TAG));
        let direct = bag
            .get_or_migrate::<SizingV2, SizingV1>(|_| panic!("must not migrate twice"))
            .unwrap();
        assert_eq!(direct, v2);
    }

    #[test]
    fn bag_serializes_as_tag_map() {
        let mut bag = PropertyBag::new();
        bag.set(&SizingV1 { cores: 2, disk_size: 50 }).unwrap();
        let raw = serde_json::to_string(&bag).unwrap();
        assert!(raw.contains("sizing.v1"));
        let back: PropertyBag = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, bag);
    }
}
