//! Storable conversion capability
//!
//! A domain type becomes persistable by describing how it maps onto a [`Record`]
//! and how its primary key compares against a raw stored value.

use crate::error::ConversionError;
use crate::types::{Record, Value};

pub trait Storable: Sized + Send + 'static {
    /// Entity this type is stored as
    fn entity_name() -> &'static str;

    /// Primary-key attribute, if the entity has one
    fn primary_key_field() -> Option<&'static str> {
        None
    }

    /// Write this object's fields into `existing`, or into a fresh record when
    /// the object is new.
    fn to_record(&self, existing: Option<Record>) -> Record;

    fn from_record(record: &Record) -> Result<Self, ConversionError>;

    fn primary_value(&self) -> Option<Value> {
        None
    }

    /// Compare this object's key with a stored key value.
    fn is_primary_value_equal(&self, raw: &Value) -> bool {
        self.primary_value()
            .map(|value| value.loosely_equals(raw))
            .unwrap_or(false)
    }
}

/// Start from `existing` (keeping its identity) or from an empty record of `T`'s entity.
pub fn base_record<T: Storable>(existing: Option<Record>) -> Record {
    existing.unwrap_or_else(|| Record::new(T::entity_name()))
}
