//! Ranked associated-term table.
//!
//! Each refresh cycle yields one term list per tile. Those lists are summed
//! into a single table keyed by the lower-cased term name and ranked by
//! mention count. While the viewport stays put, entries from the previous
//! table (and the user's enabled/disabled choice on them) are carried over.

use std::collections::HashMap;

use serde::Serialize;

use crate::data::AssociatedTerm;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TermEntry {
    pub name: String,
    pub mentions: u64,
    pub enabled: bool,
}

/// Term entries ordered by mentions, descending. Names are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RankedTerms {
    entries: Vec<TermEntry>,
    /// name -> position in `entries`
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl RankedTerms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&TermEntry> {
        self.index.get(&normalize(name)).map(|&i| &self.entries[i])
    }

    /// Returns false if the term is not in the table.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.index.get(&normalize(name)) {
            Some(&i) => {
                self.entries[i].enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TermEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn upsert(&mut self, entry: TermEntry) {
        match self.index.get(&entry.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Stable sort by mentions, descending.
    fn rank(&mut self) {
        self.entries.sort_by(|a, b| b.mentions.cmp(&a.mentions));
        self.index = self.entries.iter().enumerate().map(|(i, e)| (e.name.clone(), i)).collect();
    }
}

impl<'a> IntoIterator for &'a RankedTerms {
    type Item = &'a TermEntry;
    type IntoIter = std::slice::Iter<'a, TermEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase()
}

/// Sums per-tile term lists and merges them with the previous table.
///
/// With `viewport_changed == false` the previous entries keep their slot,
/// fresh counts overwrite matching names in place and new names are
/// appended; the final sort is stable, so equal counts keep that order.
pub fn merge_terms<'a, I>(tile_terms: I, previous: &RankedTerms, viewport_changed: bool) -> RankedTerms
where
    I: IntoIterator<Item = (&'a str, &'a [AssociatedTerm])>,
{
    let mut fresh = RankedTerms::new();
    for (_tile_id, terms) in tile_terms {
        for term in terms {
            let key = normalize(&term.name);
            match fresh.index.get(&key) {
                Some(&i) => fresh.entries[i].mentions += term.mentions,
                None => fresh.upsert(TermEntry { name: key, mentions: term.mentions, enabled: true }),
            }
        }
    }

    let mut merged = if viewport_changed { RankedTerms::new() } else { previous.clone() };
    for entry in fresh.entries {
        merged.upsert(entry);
    }

    merged.rank();
    merged
}

/// Names of enabled terms to send as the fetch filter.
pub fn enabled_filter(previous: &RankedTerms, viewport_changed: bool) -> Vec<String> {
    if viewport_changed {
        return Vec::new();
    }
    previous.iter().filter(|e| e.enabled).map(|e| e.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(pairs: &[(&str, u64)]) -> Vec<AssociatedTerm> {
        pairs.iter().map(|(n, m)| AssociatedTerm::new(*n, *m)).collect()
    }

    fn merge(lists: &[(&str, Vec<AssociatedTerm>)], previous: &RankedTerms, changed: bool) -> RankedTerms {
        merge_terms(lists.iter().map(|(id, t)| (*id, t.as_slice())), previous, changed)
    }

    fn previous_with_disabled() -> RankedTerms {
        let mut prev = merge(&[("old", terms(&[("drought", 30), ("heat", 4)]))], &RankedTerms::new(), true);
        assert!(prev.set_enabled("Drought", false));
        prev
    }

    #[test]
    fn sums_across_tiles_case_insensitively() {
        let lists = vec![
            ("a", terms(&[("Flood", 5), ("rain", 1)])),
            ("b", terms(&[("flood", 7), ("wind", 3)])),
        ];
        let ranked = merge(&lists, &RankedTerms::new(), true);

        assert_eq!(ranked.names(), vec!["flood", "wind", "rain"]);
        assert_eq!(ranked.get("FLOOD").map(|e| e.mentions), Some(12));
        assert!(ranked.iter().all(|e| e.enabled));
    }

    #[test]
    fn viewport_change_drops_previous_terms() {
        let prev = previous_with_disabled();
        let ranked = merge(&[("a", terms(&[("flood", 5)]))], &prev, true);

        assert_eq!(ranked.names(), vec!["flood"]);
        assert!(ranked.get("drought").is_none());
    }

    #[test]
    fn unchanged_viewport_keeps_previous_only_entries() {
        let prev = previous_with_disabled();
        let ranked = merge(&[("a", terms(&[("flood", 5)]))], &prev, false);

        let drought = ranked.get("drought").unwrap();
        assert_eq!(drought.mentions, 30);
        assert!(!drought.enabled);
        assert_eq!(ranked.names(), vec!["drought", "flood", "heat"]);
    }

    #[test]
    fn fresh_counts_win_on_collision() {
        let prev = previous_with_disabled();
        let ranked = merge(&[("a", terms(&[("DROUGHT", 2)]))], &prev, false);

        let drought = ranked.get("drought").unwrap();
        assert_eq!(drought.mentions, 2);
        assert!(drought.enabled);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn ties_keep_input_order() {
        let lists = vec![
            ("a", terms(&[("zebra", 4), ("apple", 4)])),
            ("b", terms(&[("mango", 9), ("kiwi", 4)])),
        ];
        let ranked = merge(&lists, &RankedTerms::new(), true);
        assert_eq!(ranked.names(), vec!["mango", "zebra", "apple", "kiwi"]);

        let mentions: Vec<u64> = ranked.iter().map(|e| e.mentions).collect();
        assert!(mentions.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn merged_ties_follow_previous_slots() {
        let prev = merge(&[("a", terms(&[("beta", 3), ("alpha", 3)]))], &RankedTerms::new(), true);
        let ranked = merge(&[("a", terms(&[("alpha", 3), ("gamma", 3)]))], &prev, false);
        assert_eq!(ranked.names(), vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn filter_lists_enabled_terms_only() {
        let prev = previous_with_disabled();
        assert_eq!(enabled_filter(&prev, false), vec!["heat".to_string()]);
        assert!(enabled_filter(&prev, true).is_empty());
    }

    #[test]
    fn lookups_follow_the_ranked_order() {
        let lists: Vec<(String, Vec<AssociatedTerm>)> = (0..2_000u64)
            .map(|i| {
                let name = format!("term{}", i % 50);
                (format!("t{}", i), terms(&[("common", 1), (name.as_str(), i)]))
            })
            .collect();
        let ranked = merge_terms(lists.iter().map(|(id, t)| (id.as_str(), t.as_slice())), &RankedTerms::new(), true);

        assert_eq!(ranked.len(), 51);
        assert_eq!(ranked.get("COMMON").map(|e| e.mentions), Some(2_000));
        for (i, entry) in ranked.iter().enumerate() {
            assert_eq!(ranked.names()[i], entry.name);
            assert_eq!(ranked.get(&entry.name), Some(entry));
        }
    }

    #[test]
    fn toggling_unknown_term_reports_false() {
        let mut prev = previous_with_disabled();
        assert!(!prev.set_enabled("tornado", true));
    }
}
