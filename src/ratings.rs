//! Family rating aggregation over a sparse member -> score mapping.

use crate::models::{member_group, Group};
use std::collections::BTreeMap;

/// Arithmetic mean of all present scores, unrounded. An empty mapping is a
/// defined case and yields 0, not an error; the display layer rounds.
pub fn average(ratings: &BTreeMap<String, u8>) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let sum: u32 = ratings.values().map(|&s| s as u32).sum();
    sum as f64 / ratings.len() as f64
}

/// Mean over the scores of members belonging to `group` per the static
/// roster. Names not on the roster belong to no group and are skipped.
pub fn group_average(ratings: &BTreeMap<String, u8>, group: Group) -> f64 {
    let group_ratings: BTreeMap<String, u8> = ratings
        .iter()
        .filter(|(name, _)| member_group(name) == Some(group))
        .map(|(name, &score)| (name.clone(), score))
        .collect();
    average(&group_ratings)
}
