//! Fetch requests: predicate, single-key sort and paging bound to one entity type.

use crate::storable::Storable;
use crate::types::{Record, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

/// Store-native boolean expression over record fields.
///
/// Comparisons against a null or absent field are false, except `IsNull`
/// and `Eq(field, Null)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    All,
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    In(String, Vec<Value>),
    /// Substring match on text fields
    Contains(String, String),
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::All
    }
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Predicate::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All => other,
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            current => Predicate::And(vec![current, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            current => Predicate::Or(vec![current, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn matches(&self, record: &Record) -> bool {
        let ordered = |field: &str, value: &Value, accept: fn(Ordering) -> bool| {
            let stored = record.get(field);
            !stored.is_null() && !value.is_null() && accept(stored.compare(value))
        };

        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => {
                let stored = record.get(field);
                if value.is_null() {
                    stored.is_null()
                } else {
                    !stored.is_null() && stored.compare(value) == Ordering::Equal
                }
            }
            Predicate::Ne(field, value) => !Predicate::Eq(field.clone(), value.clone()).matches(record),
            Predicate::Lt(field, value) => ordered(field, value, |o| o == Ordering::Less),
            Predicate::Le(field, value) => ordered(field, value, |o| o != Ordering::Greater),
            Predicate::Gt(field, value) => ordered(field, value, |o| o == Ordering::Greater),
            Predicate::Ge(field, value) => ordered(field, value, |o| o != Ordering::Less),
            Predicate::In(field, values) => {
                let stored = record.get(field);
                !stored.is_null() && values.iter().any(|v| stored.compare(v) == Ordering::Equal)
            }
            Predicate::Contains(field, needle) => record
                .text(field)
                .map(|text| text.contains(needle.as_str()))
                .unwrap_or(false),
            Predicate::IsNull(field) => record.get(field).is_null(),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }

    /// Key values when this predicate is a pure lookup on `key_field`.
    pub(crate) fn key_lookup(&self, key_field: &str) -> Option<Vec<&Value>> {
        match self {
            Predicate::Eq(field, value) if field == key_field => Some(vec![value]),
            Predicate::In(field, values) if field == key_field => Some(values.iter().collect()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Untyped fetch description, the form the store evaluates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawFetch {
    pub entity: String,
    pub predicate: Predicate,
    pub sort: Option<SortDescriptor>,
    /// 0 = unbounded
    pub limit: usize,
    pub offset: usize,
}

impl RawFetch {
    pub fn entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn has_window(&self) -> bool {
        self.limit > 0 || self.offset > 0
    }

    /// Same query without limit/offset
    pub fn unwindowed(&self) -> Self {
        Self {
            limit: 0,
            offset: 0,
            ..self.clone()
        }
    }

    /// Sort by the descriptor; ties and unsorted requests fall back to object id order.
    pub fn sort_records(&self, records: &mut [Record]) {
        records.sort_by(|a, b| {
            let primary = match &self.sort {
                Some(sort) => {
                    let ord = a.get(&sort.field).compare(b.get(&sort.field));
                    if sort.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                }
                None => Ordering::Equal,
            };
            primary.then_with(|| a.object_id.cmp(&b.object_id))
        });
    }

    pub fn apply_window(&self, records: Vec<Record>) -> Vec<Record> {
        let iter = records.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

/// A query bound to entity type `T`
pub struct FetchRequest<T> {
    predicate: Predicate,
    sort: Option<SortDescriptor>,
    limit: usize,
    offset: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Storable> FetchRequest<T> {
    pub fn all() -> Self {
        Self::filter(Predicate::All)
    }

    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate,
            sort: None,
            limit: 0,
            offset: 0,
            _entity: PhantomData,
        }
    }

    pub fn sorted_by(mut self, sort: SortDescriptor) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn to_raw(&self) -> RawFetch {
        RawFetch {
            entity: T::entity_name().to_string(),
            predicate: self.predicate.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<T> Clone for FetchRequest<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset,
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for FetchRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("entity", &std::any::type_name::<T>())
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn user(id: u64, name: &str, age: Option<i64>) -> Record {
        let mut record = Record::new("User").with("id", id as i64).with("name", name);
        record.set("age", age);
        record.object_id = Some(ObjectId(id));
        record
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let record = user(1, "A", None);
        assert!(!Predicate::Gt("age".into(), Value::Integer(0)).matches(&record));
        assert!(!Predicate::Lt("age".into(), Value::Integer(100)).matches(&record));
        assert!(Predicate::IsNull("age".into()).matches(&record));
        assert!(Predicate::Eq("age".into(), Value::Null).matches(&record));
    }

    #[test]
    fn test_compound_predicates() {
        let record = user(1, "Alice", Some(30));
        let p = Predicate::eq("name", "Alice").and(Predicate::Ge("age".into(), 30i64.into()));
        assert!(p.matches(&record));
        assert!(!p.clone().negate().matches(&record));
        assert!(Predicate::Contains("name".into(), "lic".into()).matches(&record));
        assert!(Predicate::one_of("id", [5i64, 1]).matches(&record));
    }

    #[test]
    fn test_sort_and_window() {
        let mut records = vec![user(1, "c", None), user(2, "a", None), user(3, "b", None)];
        let fetch = RawFetch {
            sort: Some(SortDescriptor::descending("name")),
            limit: 2,
            offset: 1,
            ..RawFetch::entity("User")
        };
        fetch.sort_records(&mut records);
        let window = fetch.apply_window(records);
        let names: Vec<_> = window.iter().map(|r| r.text("name").unwrap()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_key_lookup_detection() {
        let p = Predicate::one_of("id", ["1", "2"]);
        assert_eq!(p.key_lookup("id").map(|v| v.len()), Some(2));
        assert!(p.key_lookup("name").is_none());
        assert!(Predicate::All.key_lookup("id").is_none());
    }
}
