//! The Registry Aggregator (§4.8): holds `SourceRegistration`s, fetches and
//! merges their catalogs, and services marketplace queries.
//!
//! Grounded on the teacher's `DashMap`-backed registries (e.g.
//! `ultrafast-gateway/src/plugins/mod.rs`'s `PluginManager`): concurrent maps
//! instead of a mutex-guarded `Vec`, so reads (marketplace queries) never
//! block on a fetch in flight.

use crate::model::{CatalogEntry, SourceRegistration};
use crate::registry::source;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;

/// Filters accepted by `list` (§4.8).
#[derive(Debug, Default, Clone)]
pub struct CatalogFilter {
    pub category: Option<String>,
    pub verified: Option<bool>,
    pub featured: Option<bool>,
    pub search: Option<String>,
}

pub struct RegistryAggregator {
    sources: DashMap<String, SourceRegistration>,
    /// Every entry seen from every source, keyed by `(sourceId, manifest.id)`
    /// so `merge` can be recomputed cheaply without re-fetching.
    raw_entries: DashMap<String, Vec<CatalogEntry>>,
}

impl RegistryAggregator {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            raw_entries: DashMap::new(),
        }
    }

    pub fn register_source(&self, source: SourceRegistration) {
        self.sources.insert(source.source_id.clone(), source);
    }

    pub fn remove_source(&self, source_id: &str) -> Option<SourceRegistration> {
        self.raw_entries.remove(source_id);
        self.sources.remove(source_id).map(|(_, v)| v)
    }

    pub fn set_enabled(&self, source_id: &str, enabled: bool) -> bool {
        if let Some(mut entry) = self.sources.get_mut(source_id) {
            entry.enabled = enabled;
            true
        } else {
            false
        }
    }

    pub fn sources(&self) -> Vec<SourceRegistration> {
        self.sources.iter().map(|e| e.value().clone()).collect()
    }

    /// Re-fetch one source's catalog; records `lastFetchedAt`/`lastError`
    /// regardless of outcome (§4.8) and never propagates the fetch error —
    /// the caller reads it back off the `SourceRegistration`.
    pub async fn refresh(&self, source_id: &str) {
        let Some(source) = self.sources.get(source_id).map(|e| e.value().clone()) else {
            return;
        };
        if !source.enabled {
            return;
        }
        match source::fetch(&source.source_id, source.kind, &source.url).await {
            Ok(entries) => {
                self.raw_entries.insert(source_id.to_string(), entries);
                if let Some(mut s) = self.sources.get_mut(source_id) {
                    s.last_fetched_at = Some(Utc::now());
                    s.last_error = None;
                }
            }
            Err(e) => {
                if let Some(mut s) = self.sources.get_mut(source_id) {
                    s.last_fetched_at = Some(Utc::now());
                    s.last_error = Some(e.to_string());
                }
            }
        }
    }

    /// Re-fetch every enabled source. Safe to call concurrently with itself
    /// or with `refresh` (§8 idempotence: "safe to call concurrently; the
    /// resulting catalog is identical regardless of ordering" — merge keys
    /// purely on `priority`, not arrival order).
    pub async fn refresh_all(&self) {
        let ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.refresh(&id).await;
        }
    }

    /// Union all fetched entries; for duplicate `manifest.id`, the entry
    /// from the smallest-`priority` source wins; featured sorts first;
    /// ties break by descending downloads (§4.8).
    pub fn merged_catalog(&self) -> Vec<CatalogEntry> {
        let mut winners: HashMap<String, (i32, CatalogEntry)> = HashMap::new();
        for entries in self.raw_entries.iter() {
            let Some(source) = self.sources.get(entries.key()) else {
                continue;
            };
            if !source.enabled {
                continue;
            }
            for entry in entries.value() {
                let priority = source.priority;
                match winners.get(&entry.manifest.id) {
                    Some((existing_priority, _)) if *existing_priority <= priority => {}
                    _ => {
                        winners.insert(entry.manifest.id.clone(), (priority, entry.clone()));
                    }
                }
            }
        }
        let mut catalog: Vec<CatalogEntry> = winners.into_values().map(|(_, e)| e).collect();
        catalog.sort_by(|a, b| {
            b.featured
                .cmp(&a.featured)
                .then_with(|| b.downloads.unwrap_or(0).cmp(&a.downloads.unwrap_or(0)))
        });
        catalog
    }

    pub fn list(&self, filter: &CatalogFilter) -> Vec<CatalogEntry> {
        self.merged_catalog()
            .into_iter()
            .filter(|e| {
                if let Some(category) = &filter.category {
                    if e.manifest
                        .category
                        .map(|c| format!("{c:?}").to_lowercase())
                        .as_deref()
                        != Some(category.as_str())
                    {
                        return false;
                    }
                }
                if let Some(verified) = filter.verified {
                    if e.verified != verified {
                        return false;
                    }
                }
                if let Some(featured) = filter.featured {
                    if e.featured != featured {
                        return false;
                    }
                }
                if let Some(search) = &filter.search {
                    let needle = search.to_lowercase();
                    let haystack = format!(
                        "{} {} {}",
                        e.manifest.name,
                        e.manifest.description,
                        e.manifest.tags.join(" ")
                    )
                    .to_lowercase();
                    if !haystack.contains(&needle) {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    pub fn get(&self, manifest_id: &str) -> Option<CatalogEntry> {
        self.merged_catalog()
            .into_iter()
            .find(|e| e.manifest.id == manifest_id)
    }

    pub fn categories_with_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for entry in self.merged_catalog() {
            if let Some(category) = entry.manifest.category {
                *counts.entry(format!("{category:?}").to_lowercase()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl Default for RegistryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Manifest, SourceKind};

    fn entry(source_id: &str, manifest_id: &str, downloads: u64, featured: bool) -> CatalogEntry {
        let manifest = Manifest::synthesize_for_adoption(manifest_id, "x/y", "1.0.0", 3000, 4000);
        let now = Utc::now();
        CatalogEntry {
            source_id: source_id.to_string(),
            manifest,
            downloads: Some(downloads),
            rating: None,
            verified: false,
            featured,
            published_at: now,
            updated_at: now,
        }
    }

    fn registration(source_id: &str, priority: i32) -> SourceRegistration {
        SourceRegistration {
            source_id: source_id.to_string(),
            name: source_id.to_string(),
            url: "https://example.com/index.json".to_string(),
            kind: SourceKind::HttpIndex,
            enabled: true,
            priority,
            is_default: false,
            last_fetched_at: None,
            last_error: None,
        }
    }

    #[test]
    fn smaller_priority_wins_on_duplicate_id() {
        let agg = RegistryAggregator::new();
        agg.register_source(registration("a", 10));
        agg.register_source(registration("b", 5));
        agg.raw_entries.insert("a".to_string(), vec![entry("a", "pdf", 100, false)]);
        agg.raw_entries.insert("b".to_string(), vec![entry("b", "pdf", 10, false)]);

        let catalog = agg.merged_catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].source_id, "b");
    }

    #[test]
    fn disabling_a_source_removes_its_entries_from_the_merge() {
        let agg = RegistryAggregator::new();
        agg.register_source(registration("a", 10));
        agg.register_source(registration("b", 5));
        agg.raw_entries.insert("a".to_string(), vec![entry("a", "pdf", 100, false)]);
        agg.raw_entries.insert("b".to_string(), vec![entry("b", "pdf", 10, false)]);

        agg.set_enabled("b", false);
        let catalog = agg.merged_catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].source_id, "a");
    }

    #[test]
    fn featured_sorts_before_non_featured() {
        let agg = RegistryAggregator::new();
        agg.register_source(registration("a", 10));
        agg.raw_entries.insert(
            "a".to_string(),
            vec![
                entry("a", "low-dl-featured", 1, true),
                entry("a", "high-dl-plain", 1000, false),
            ],
        );
        let catalog = agg.merged_catalog();
        assert_eq!(catalog[0].manifest.id, "low-dl-featured");
    }
}
