use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::interpolate::InterpolatedSeries;
use crate::settings::InterpolationSettings;
use crate::table::Column;
use crate::timeline::UniversalTimeline;
use crate::AlignError;

#[derive(Serialize)]
struct KeyMaterial<'a> {
    time_column: &'a Column,
    value_column: &'a Column,
    method: &'a str,
    timeline: &'a UniversalTimeline,
    time_formats: &'a [String],
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// A finished series together with the warnings raised while computing it.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedSeries {
    pub series: InterpolatedSeries,
    pub warnings: Vec<AlignError>,
}

impl From<InterpolatedSeries> for CachedSeries {
    fn from(series: InterpolatedSeries) -> Self {
        Self {
            series,
            warnings: Vec::new(),
        }
    }
}

/// Least-recently-used store of interpolated series, bounded by a fixed
/// number of entries. A capacity of zero keeps nothing.
#[derive(Debug, Default)]
pub struct SeriesCache {
    capacity: usize,
    entries: HashMap<String, CachedSeries>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl SeriesCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Cache sized by `cache_capacity`.
    pub fn from_settings(settings: &InterpolationSettings) -> Self {
        Self::new(settings.cache_capacity)
    }

    /// Digest of everything that determines a series: both columns' names
    /// and contents, the method label, the timeline and the time formats.
    pub fn key(
        time_column: &Column,
        value_column: &Column,
        method: &str,
        timeline: &UniversalTimeline,
        time_formats: &[String],
    ) -> Result<String, AlignError> {
        let material = KeyMaterial {
            time_column,
            value_column,
            method,
            timeline,
            time_formats,
        };
        let bytes = serde_json::to_vec(&material).map_err(|e| AlignError::Data(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn get(&mut self, key: &str) -> Option<CachedSeries> {
        match self.entries.get(key) {
            Some(entry) => {
                let entry = entry.clone();
                self.touch(key);
                self.hits += 1;
                Some(entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: String, entry: impl Into<CachedSeries>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), entry.into()).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!("Evicting cached series {}", &oldest[..12.min(oldest.len())]);
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}
