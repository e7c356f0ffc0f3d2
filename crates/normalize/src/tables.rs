//! Static per-station lookup tables. Built-in defaults can be replaced by a
//! TOML file; keys left out of the file keep their defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use epgsync_core::RecordId;
use serde::{Deserialize, Serialize};

/// Playback-region sentinel meaning "anywhere".
pub const GLOBAL_REGION: &str = "GLOBAL";

#[derive(Debug, thiserror::Error)]
pub enum TablesError {
    #[error("reading tables {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing tables: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationTables {
    /// Category code marking news items.
    pub news_category: String,
    /// Categories that are standalone movies (no episode numbering).
    pub movie_categories: BTreeSet<String>,
    /// Categories that are movies but keep their episode numbering.
    pub numbered_movie_categories: BTreeSet<String>,
    pub default_playback_countries: Vec<String>,
    pub global_series: BTreeSet<String>,
    pub global_categories: BTreeSet<String>,
    pub no_moments_stations: BTreeSet<String>,
    pub no_moments_series: BTreeSet<String>,
    /// Series flagged live by the feed that are really recordings.
    pub not_really_live_series: BTreeSet<String>,
    pub unpublished_series: BTreeSet<String>,
    /// Station name to the collection id movies are filed under. Integer
    /// ids stay integers.
    pub movie_collections: BTreeMap<String, RecordId>,
}

impl Default for StationTables {
    fn default() -> Self {
        Self {
            news_category: "FRE".to_string(),
            movie_categories: set(&["KVI"]),
            numbered_movie_categories: set(&["MSE"]),
            default_playback_countries: vec!["IS".to_string()],
            global_series: BTreeSet::new(),
            global_categories: BTreeSet::new(),
            no_moments_stations: BTreeSet::new(),
            no_moments_series: BTreeSet::new(),
            not_really_live_series: BTreeSet::new(),
            unpublished_series: BTreeSet::new(),
            movie_collections: BTreeMap::new(),
        }
    }
}

fn set(items: &[&str]) -> BTreeSet<String> { items.iter().map(|s| s.to_string()).collect() }

impl StationTables {
    pub fn from_toml_str(s: &str) -> Result<Self, TablesError> { Ok(toml::from_str(s)?) }

    pub fn load(path: &Path) -> Result<Self, TablesError> {
        let text = std::fs::read_to_string(path).map_err(|source| TablesError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&text)
    }

    pub fn movie_collection_for(&self, station: &str) -> Option<&RecordId> { self.movie_collections.get(station) }
}
