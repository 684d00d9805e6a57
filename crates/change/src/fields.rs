//! Field-level diffs over JSON values: single scalars, key/value maps (config entries)
//! and whole `spec` objects.

use serde_json::{Map, Value as Json};

use kspec_core::{Change, ChangeType, FieldChange, FieldChanges, ValueChange};

use crate::engine::ChangeComputer;
use crate::ChangeError;

/// Sentinel used by numeric fields to decline management (`partitions: -1`).
pub const NO_PREFERENCE: i64 = -1;

/// `null` means "no preference".
pub fn is_null(v: &Json) -> bool { v.is_null() }

/// `null` or the `-1` sentinel means "no preference".
pub fn is_no_preference(v: &Json) -> bool { v.is_null() || v.as_i64() == Some(NO_PREFERENCE) }

/// Scalar equality that ignores string/number/bool representation (`1` == `"1"`).
pub fn values_equal(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::String(x), Json::Number(_) | Json::Bool(_)) => *x == b.to_string(),
        (Json::Number(_) | Json::Bool(_), Json::String(y)) => a.to_string() == *y,
        (Json::Number(x), Json::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Classification of one entry. `None` drops the entry: the desired side declined to
/// manage a value that does not exist.
pub fn classify_entry(before: Option<&Json>, after: Option<&Json>, unset: &dyn Fn(&Json) -> bool) -> Option<ChangeType> {
    match (before, after) {
        (b, Some(a)) if unset(a) => b.map(|_| ChangeType::None),
        (None, Some(_)) => Some(ChangeType::Add),
        (Some(_), None) => Some(ChangeType::Delete),
        (Some(b), Some(a)) => Some(if values_equal(b, a) { ChangeType::None } else { ChangeType::Update }),
        (None, None) => None,
    }
}

/// One named scalar field. A field the desired side does not mention is not managed.
pub fn diff_scalar(
    name: &str,
    before: Option<&Json>,
    after: Option<&Json>,
    unset: &dyn Fn(&Json) -> bool,
) -> Option<FieldChange> {
    let after = after?;
    let change_type = classify_entry(before, Some(after), unset)?;
    let value = ValueChange::new(before.cloned(), Some(after.clone()))?.conform(change_type);
    Some(Change::new(name.to_string(), change_type, value))
}

/// Entry-by-entry diff of two maps with the same keyed algorithm as resources.
/// Entries only present in `before` are deleted when `delete_orphans` is set.
pub fn diff_entries(
    before: Option<&Map<String, Json>>,
    after: Option<&Map<String, Json>>,
    delete_orphans: bool,
    unset: &dyn Fn(&Json) -> bool,
) -> Result<FieldChanges, ChangeError> {
    let entries = |m: Option<&Map<String, Json>>| -> Vec<(String, Json)> {
        m.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default()
    };
    let computer = ChangeComputer::new(|e: &(String, Json)| e.0.clone(), |e: &(String, Json)| e.1.clone())
        .with_classifier(|b: Option<&(String, Json)>, a: Option<&(String, Json)>, _: &FieldChanges| {
            classify_entry(b.map(|e| &e.1), a.map(|e| &e.1), unset)
        })
        .delete_orphans(delete_orphans)
        .keep_unchanged_fields(true);
    let changes = computer.compute(entries(before), entries(after))?;
    Ok(changes.into_iter().map(|c| (c.key.clone(), c)).collect())
}

/// Diff of two `spec` objects by top-level key. Nested objects become a container change
/// whose sub-changes are the entry diff of the two objects; keys the desired side omits
/// are not managed.
pub fn diff_spec(before: Option<&Json>, after: Option<&Json>, nested_delete_orphans: bool) -> Result<FieldChanges, ChangeError> {
    let empty = Map::new();
    let b_obj = before.and_then(Json::as_object);
    let Some(after) = after else {
        // Whole resource goes away: every known field is deleted.
        return diff_entries(b_obj, Some(&empty), true, &is_null);
    };
    let Some(a_obj) = after.as_object() else { return Ok(FieldChanges::new()) };
    let mut out = FieldChanges::new();
    for (key, a_val) in a_obj.iter() {
        let b_val = b_obj.and_then(|m| m.get(key));
        match (b_val.and_then(Json::as_object), a_val.as_object()) {
            (b_map, Some(a_map)) => {
                let nested = diff_entries(b_map, Some(a_map), nested_delete_orphans, &is_null)?;
                let change_type = match b_val {
                    None => ChangeType::Add,
                    Some(_) => ChangeType::reduce(nested.values().map(|c| c.change_type)),
                };
                let Some(value) = ValueChange::new(b_val.cloned(), Some(a_val.clone())) else { continue };
                out.insert(key.clone(), Change::new(key.clone(), change_type, value.conform(change_type)).with_fields(nested));
            }
            _ => {
                if let Some(c) = diff_scalar(key, b_val, Some(a_val), &is_null) { out.insert(key.clone(), c); }
            }
        }
    }
    Ok(out)
}
