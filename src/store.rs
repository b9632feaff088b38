//! The concurrent in-memory store of birds and their sightings.
//!
//! Two invariants are enforced at insertion time: bird names are globally
//! unique, and every sighting references a bird currently in the store.
//! Removing a bird cascades to its sightings. All mutating operations are
//! atomic with respect to each other through per-key map entries, so
//! operations on unrelated keys never block one another.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AviaryError, Result};

/// A bird kept in the [`Store`], uniquely keyed by its name.
///
/// Birds are immutable once added, except for the internal `stored` marker
/// maintained by the persistence writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bird {
    /// unique name of the bird
    pub name: String,
    /// color of the bird
    pub color: String,
    /// height of the bird
    pub height: f64,
    /// weight of the bird
    pub weight: f64,
    /// whether this bird has been written to disk by the persistence writer
    #[serde(default)]
    pub stored: bool,
}

impl Bird {
    /// creates a bird that has not yet been persisted
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        height: f64,
        weight: f64,
    ) -> Self {
        Bird {
            name: name.into(),
            color: color.into(),
            height,
            weight,
            stored: false,
        }
    }
}

/// A single observation of a bird. Never mutated once recorded; destroyed
/// only as a cascade of removing its bird.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sighting {
    /// name of the sighted bird
    pub name: String,
    /// where the bird was sighted
    pub location: String,
    /// when the bird was sighted, in epoch milliseconds
    pub timestamp: i64,
}

/// Concurrent collections of birds and sightings.
///
/// The store lives for the whole process: it is created once at startup,
/// optionally pre-populated from the persisted files, and flushed back to
/// disk by the persistence writer.
#[derive(Debug, Default)]
pub struct Store {
    birds: DashMap<String, Bird>,
    // per-bird sighting sets; (location, timestamp) must be unique per bird
    sightings: DashMap<String, HashSet<Sighting>>,
}

impl Store {
    /// creates an empty store
    pub fn new() -> Self {
        Store::default()
    }

    /// Inserts `bird` if no bird with that name exists yet.
    ///
    /// # Errors
    /// returns [`AviaryError::DuplicateKey`] if the name is taken, even by an
    /// identical bird; the stored bird is left untouched
    ///
    /// [`AviaryError::DuplicateKey`]: ./enum.AviaryError.html
    pub fn add_bird(&self, bird: Bird) -> Result<()> {
        match self.birds.entry(bird.name.clone()) {
            Entry::Occupied(_) => Err(AviaryError::DuplicateKey(format!(
                "a bird with the name {} already exists",
                bird.name
            ))),
            Entry::Vacant(slot) => {
                slot.insert(bird);
                Ok(())
            }
        }
    }

    /// Removes the named bird and all of its sightings.
    ///
    /// The cascade happens while the bird's entry is held, so no concurrent
    /// operation can observe the bird gone but its sightings present.
    /// Lock order is always birds before sightings.
    ///
    /// # Errors
    /// returns [`AviaryError::NotFound`] if no bird has that name; nothing
    /// is mutated in that case
    ///
    /// [`AviaryError::NotFound`]: ./enum.AviaryError.html
    pub fn remove_bird(&self, name: &str) -> Result<()> {
        match self.birds.entry(name.to_owned()) {
            Entry::Occupied(slot) => {
                self.sightings.remove(name);
                slot.remove();
                Ok(())
            }
            Entry::Vacant(_) => Err(AviaryError::NotFound(format!(
                "a bird with the name {} does not exist",
                name
            ))),
        }
    }

    /// Records a sighting of an existing bird.
    ///
    /// # Errors
    /// returns [`AviaryError::NotFound`] if the referenced bird does not
    /// exist, or [`AviaryError::DuplicateKey`] if a sighting with the same
    /// location and timestamp is already recorded for that bird
    ///
    /// [`AviaryError::NotFound`]: ./enum.AviaryError.html
    /// [`AviaryError::DuplicateKey`]: ./enum.AviaryError.html
    pub fn add_sighting(&self, sighting: Sighting) -> Result<()> {
        // the existence check holds the bird's entry for the duration of the
        // insert, so a concurrent remove_bird cannot slip between the steps
        let bird = self.birds.get(&sighting.name).ok_or_else(|| {
            AviaryError::NotFound(format!(
                "a bird with the name {} does not exist",
                sighting.name
            ))
        })?;
        let mut set = self.sightings.entry(bird.key().clone()).or_default();
        if set.insert(sighting) {
            Ok(())
        } else {
            Err(AviaryError::DuplicateKey(
                "a sighting with this location and timestamp already exists for this bird"
                    .to_owned(),
            ))
        }
    }

    /// Returns all birds ordered by name ascending. The ordering is part of
    /// the contract: clients render this list directly.
    pub fn list_birds(&self) -> Vec<Bird> {
        let mut birds: Vec<Bird> = self.birds.iter().map(|e| e.value().clone()).collect();
        birds.sort_by(|a, b| a.name.cmp(&b.name));
        birds
    }

    /// Returns the sightings of every bird whose name fully matches
    /// `name_pattern` as a regular expression (not a substring search) and
    /// whose timestamp falls in `[start, end]` inclusive, ordered by bird
    /// name then timestamp ascending.
    ///
    /// # Errors
    /// returns [`AviaryError::Decode`] if `name_pattern` is not a valid
    /// regular expression
    ///
    /// [`AviaryError::Decode`]: ./enum.AviaryError.html
    pub fn find_sightings(
        &self,
        name_pattern: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Sighting>> {
        // anchor the pattern so it matches whole names only
        let pattern = Regex::new(&format!(r"\A(?:{})\z", name_pattern))?;
        let mut found = Vec::new();
        for entry in self.sightings.iter() {
            if !pattern.is_match(entry.key()) {
                continue;
            }
            found.extend(
                entry
                    .value()
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .cloned(),
            );
        }
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.timestamp.cmp(&b.timestamp)));
        Ok(found)
    }

    /// Returns all birds ordered by name, marking each one's `stored` flag
    /// on the way out. Only the persistence writer calls this, from inside
    /// its exclusive snapshot section.
    pub fn snapshot_birds(&self) -> Vec<Bird> {
        let mut birds = Vec::with_capacity(self.birds.len());
        for mut entry in self.birds.iter_mut() {
            entry.value_mut().stored = true;
            birds.push(entry.value().clone());
        }
        birds.sort_by(|a, b| a.name.cmp(&b.name));
        birds
    }

    /// Returns the recorded sightings of one bird, ordered by timestamp.
    pub fn sightings_of(&self, name: &str) -> Vec<Sighting> {
        match self.sightings.get(name) {
            Some(set) => {
                let mut sightings: Vec<Sighting> = set.iter().cloned().collect();
                sightings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                sightings
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn robin() -> Bird {
        Bird::new("robin", "red", 2.0, 1.0)
    }

    fn sighting(name: &str, location: &str, timestamp: i64) -> Sighting {
        Sighting {
            name: name.to_owned(),
            location: location.to_owned(),
            timestamp,
        }
    }

    #[test]
    fn adding_the_same_name_twice_fails_and_keeps_the_original() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        let err = store
            .add_bird(Bird::new("robin", "blue", 9.0, 9.0))
            .unwrap_err();
        assert!(matches!(err, AviaryError::DuplicateKey(_)));
        assert_eq!(store.list_birds()[0].color, "red");
    }

    #[test]
    fn removing_an_unknown_bird_fails_without_mutation() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        let err = store.remove_bird("sparrow").unwrap_err();
        assert!(matches!(err, AviaryError::NotFound(_)));
        assert_eq!(store.list_birds().len(), 1);
    }

    #[test]
    fn removing_a_bird_cascades_to_its_sightings() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        store.add_sighting(sighting("robin", "park", 100)).unwrap();
        store.remove_bird("robin").unwrap();
        assert!(store.list_birds().is_empty());
        assert!(store.find_sightings(".*", 0, i64::MAX).unwrap().is_empty());
    }

    #[test]
    fn sighting_of_an_unknown_bird_is_rejected() {
        let store = Store::new();
        let err = store
            .add_sighting(sighting("sparrow", "park", 100))
            .unwrap_err();
        assert!(matches!(err, AviaryError::NotFound(_)));
    }

    #[test]
    fn duplicate_location_and_timestamp_is_rejected() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        store.add_sighting(sighting("robin", "park", 100)).unwrap();
        let err = store
            .add_sighting(sighting("robin", "park", 100))
            .unwrap_err();
        assert!(matches!(err, AviaryError::DuplicateKey(_)));
        // same location at a different time is a new sighting
        store.add_sighting(sighting("robin", "park", 101)).unwrap();
    }

    #[test]
    fn list_birds_is_sorted_by_name() {
        let store = Store::new();
        store.add_bird(Bird::new("wren", "brown", 1.0, 0.5)).unwrap();
        store.add_bird(robin()).unwrap();
        store.add_bird(Bird::new("sparrow", "grey", 1.0, 0.5)).unwrap();
        let names: Vec<String> = store.list_birds().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["robin", "sparrow", "wren"]);
    }

    #[test]
    fn pattern_is_matched_against_the_full_name() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        store.add_bird(Bird::new("robin2", "red", 2.0, 1.0)).unwrap();
        store.add_sighting(sighting("robin", "park", 10)).unwrap();
        store.add_sighting(sighting("robin2", "lake", 10)).unwrap();

        let found = store.find_sightings("robin", 0, 100).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "robin");

        let found = store.find_sightings("robin.*", 0, 100).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn time_range_is_inclusive_and_results_are_ordered() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        store.add_bird(Bird::new("wren", "brown", 1.0, 0.5)).unwrap();
        store.add_sighting(sighting("wren", "lake", 1)).unwrap();
        store.add_sighting(sighting("robin", "park", 3)).unwrap();
        store.add_sighting(sighting("robin", "lake", 2)).unwrap();
        store.add_sighting(sighting("robin", "park", 4)).unwrap();

        let found = store.find_sightings(".*", 1, 3).unwrap();
        let keys: Vec<(String, i64)> = found.into_iter().map(|s| (s.name, s.timestamp)).collect();
        assert_eq!(
            keys,
            vec![
                ("robin".to_owned(), 2),
                ("robin".to_owned(), 3),
                ("wren".to_owned(), 1),
            ]
        );
    }

    #[test]
    fn invalid_pattern_is_a_decode_error() {
        let store = Store::new();
        let err = store.find_sightings("(unclosed", 0, 10).unwrap_err();
        assert!(matches!(err, AviaryError::Decode(_)));
    }

    #[test]
    fn concurrent_adds_of_the_same_name_have_exactly_one_winner() {
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.add_bird(robin()).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(store.list_birds().len(), 1);
    }

    #[test]
    fn snapshot_marks_birds_as_stored() {
        let store = Store::new();
        store.add_bird(robin()).unwrap();
        assert!(!store.list_birds()[0].stored);
        let snapshot = store.snapshot_birds();
        assert!(snapshot[0].stored);
        assert!(store.list_birds()[0].stored);
    }
}
