//! Keyed diff of two collections.
//!
//! Both sides are indexed by `key_of`; every key of the desired side yields at most one
//! change, keys only present on the actual side (orphans) yield a `Delete` when orphan
//! deletion is enabled and nothing otherwise. Output is ordered by key, so it depends only
//! on the contents of the two inputs and never on their order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kspec_core::{Change, ChangeType, FieldChanges, ValueChange};

use crate::{ChangeError, Side};

type KeyFn<'a, R, K> = Box<dyn Fn(&R) -> K + 'a>;
type ValueFn<'a, R, V> = Box<dyn Fn(&R) -> V + 'a>;
type FieldsFn<'a, R> = Box<dyn Fn(Option<&R>, Option<&R>) -> Result<FieldChanges, ChangeError> + 'a>;
type ClassifyFn<'a, R> = Box<dyn Fn(Option<&R>, Option<&R>, &FieldChanges) -> Option<ChangeType> + 'a>;
type MarkFn<'a, R> = Box<dyn Fn(&R) -> bool + 'a>;

pub struct ChangeComputer<'a, R, K, V> {
    key_of: KeyFn<'a, R, K>,
    value_of: ValueFn<'a, R, V>,
    fields_of: FieldsFn<'a, R>,
    classify: ClassifyFn<'a, R>,
    marked_for_deletion: MarkFn<'a, R>,
    delete_orphans: bool,
    keep_unchanged_fields: bool,
}

impl<'a, R: 'a, K, V> ChangeComputer<'a, R, K, V>
where
    K: Ord + Clone + fmt::Display,
{
    pub fn new(key_of: impl Fn(&R) -> K + 'a, value_of: impl Fn(&R) -> V + 'a) -> Self {
        Self {
            key_of: Box::new(key_of),
            value_of: Box::new(value_of),
            fields_of: Box::new(|_: Option<&R>, _: Option<&R>| Ok(FieldChanges::new())),
            classify: Box::new(|b: Option<&R>, a: Option<&R>, f: &FieldChanges| Some(classify_default(b, a, f))),
            marked_for_deletion: Box::new(|_: &R| false),
            delete_orphans: false,
            keep_unchanged_fields: false,
        }
    }

    pub fn with_key(mut self, key_of: impl Fn(&R) -> K + 'a) -> Self {
        self.key_of = Box::new(key_of);
        self
    }

    /// Field-level sub-changes for a matched pair (either side may be absent).
    pub fn with_fields(
        mut self,
        fields_of: impl Fn(Option<&R>, Option<&R>) -> Result<FieldChanges, ChangeError> + 'a,
    ) -> Self {
        self.fields_of = Box::new(fields_of);
        self
    }

    /// Resource-level classification. Returning `None` drops the key from the output.
    pub fn with_classifier(
        mut self,
        classify: impl Fn(Option<&R>, Option<&R>, &FieldChanges) -> Option<ChangeType> + 'a,
    ) -> Self {
        self.classify = Box::new(classify);
        self
    }

    /// A desired item for which `marked` holds is classified `Delete` when the actual side
    /// has it, and dropped when it does not.
    pub fn with_deletion_marker(mut self, marked: impl Fn(&R) -> bool + 'a) -> Self {
        self.marked_for_deletion = Box::new(marked);
        self
    }

    pub fn delete_orphans(mut self, on: bool) -> Self {
        self.delete_orphans = on;
        self
    }

    /// Keep `None` field changes in the output instead of pruning them.
    pub fn keep_unchanged_fields(mut self, on: bool) -> Self {
        self.keep_unchanged_fields = on;
        self
    }

    pub fn compute<I, J>(&self, actual: I, desired: J) -> Result<Vec<Change<K, V>>, ChangeError>
    where
        I: IntoIterator<Item = R>,
        J: IntoIterator<Item = R>,
    {
        let actual = self.index(actual, Side::Actual)?;
        let desired = self.index(desired, Side::Desired)?;
        let keys: BTreeSet<&K> = actual.keys().chain(desired.keys()).collect();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let before = actual.get(key);
            let change = match desired.get(key) {
                Some(after) => self.desired_change(key, before, after)?,
                None => match before {
                    Some(orphan) if self.delete_orphans => {
                        let fields = (self.fields_of)(Some(orphan), None)?;
                        Some(self.build(key, ChangeType::Delete, Some(orphan), None, fields)?)
                    }
                    _ => None,
                },
            };
            if let Some(c) = change { out.push(c); }
        }
        Ok(out)
    }

    fn desired_change(&self, key: &K, before: Option<&R>, after: &R) -> Result<Option<Change<K, V>>, ChangeError> {
        if (self.marked_for_deletion)(after) {
            return match before {
                Some(existing) => {
                    let fields = (self.fields_of)(Some(existing), None)?;
                    self.build(key, ChangeType::Delete, Some(existing), None, fields).map(Some)
                }
                None => Ok(None),
            };
        }
        let fields = (self.fields_of)(before, Some(after))?;
        match (self.classify)(before, Some(after), &fields) {
            Some(t) => self.build(key, t, before, Some(after), fields).map(Some),
            None => Ok(None),
        }
    }

    fn build(
        &self,
        key: &K,
        change_type: ChangeType,
        before: Option<&R>,
        after: Option<&R>,
        fields: FieldChanges,
    ) -> Result<Change<K, V>, ChangeError> {
        let value = ValueChange::new(before.map(&self.value_of), after.map(&self.value_of))
            .ok_or_else(|| ChangeError::EmptyValueChange { key: key.to_string() })?
            .conform(change_type);
        let fields = if self.keep_unchanged_fields { fields } else { prune_unchanged(fields) };
        Ok(Change::new(key.clone(), change_type, value).with_fields(fields))
    }

    fn index<I: IntoIterator<Item = R>>(&self, items: I, side: Side) -> Result<BTreeMap<K, R>, ChangeError> {
        let mut map = BTreeMap::new();
        for item in items {
            let key = (self.key_of)(&item);
            if map.contains_key(&key) {
                return Err(ChangeError::DuplicateKey { side, key: key.to_string() });
            }
            map.insert(key, item);
        }
        Ok(map)
    }
}

/// `Add` when only desired exists, `Delete` when only actual exists, otherwise the
/// reduction of the field-level types.
pub fn classify_default<R>(before: Option<&R>, after: Option<&R>, fields: &FieldChanges) -> ChangeType {
    match (before, after) {
        (None, _) => ChangeType::Add,
        (_, None) => ChangeType::Delete,
        _ => ChangeType::reduce(fields.values().map(|c| c.change_type)),
    }
}

/// Drop `None` entries, recursively.
pub fn prune_unchanged(fields: FieldChanges) -> FieldChanges {
    fields
        .into_iter()
        .filter(|(_, c)| !c.change_type.is_none())
        .map(|(k, mut c)| {
            c.fields = prune_unchanged(std::mem::take(&mut c.fields));
            (k, c)
        })
        .collect()
}
