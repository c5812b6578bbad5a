//! Free-form name lookup over a dataset snapshot.
//!
//! Matching is exact equality on the folded form (case, accents and
//! surrounding whitespace ignored). There is no fuzzy or prefix matching.

use crate::dataset::{Dataset, Record};
use crate::normalize::fold;

/// Outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Found(&'a Record),
    NotFound,
    /// The cache has never loaded successfully
    DataUnavailable,
}

/// Return the first record (in sheet order) whose folded project name equals
/// the folded query.
pub fn find<'a>(dataset: &'a Dataset, query: &str) -> Lookup<'a> {
    if dataset.is_empty_sentinel() {
        return Lookup::DataUnavailable;
    }

    let key = fold(query);
    if key.is_empty() {
        return Lookup::NotFound;
    }

    dataset
        .records
        .iter()
        .find(|r| r.normalized_key == key)
        .map(Lookup::Found)
        .unwrap_or(Lookup::NotFound)
}
