use std::collections::{HashMap, HashSet};

use crate::domain::{Catalog, CatalogRow, RawTable};
use crate::error::GeofabrikError;
use crate::table::PageTableExtractor;

pub trait DuplicatePolicy {
    fn select(&self, rows: &[&CatalogRow]) -> usize;
}

/// Keeps the row with the largest `.osm.pbf` size. The earliest row wins ties;
/// rows without a size rank lowest.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLargest;

impl DuplicatePolicy for KeepLargest {
    fn select(&self, rows: &[&CatalogRow]) -> usize {
        let mut best = 0;
        let mut best_size = None;
        for (position, row) in rows.iter().enumerate() {
            let size = row.pbf_size_bytes();
            if size > best_size {
                best = position;
                best_size = size;
            }
        }
        best
    }
}

pub struct CatalogCompactor<'a, E: PageTableExtractor + ?Sized> {
    extractor: &'a E,
    policy: &'a dyn DuplicatePolicy,
}

impl<'a, E: PageTableExtractor + ?Sized> CatalogCompactor<'a, E> {
    pub fn new(extractor: &'a E) -> Self {
        Self::with_policy(extractor, &KeepLargest)
    }

    pub fn with_policy(extractor: &'a E, policy: &'a dyn DuplicatePolicy) -> Self {
        Self { extractor, policy }
    }

    pub fn compact(&self, seed_url: &str) -> Result<Catalog, GeofabrikError> {
        let root = self
            .extractor
            .subregion_table(seed_url)?
            .filter(|table| !table.rows.is_empty())
            .ok_or_else(|| GeofabrikError::PageParse {
                url: seed_url.to_string(),
                message: "no subregion table on the root page".to_string(),
            })?;
        let tables = self.collect(seed_url, root);
        let catalog = compact_tables(tables, self.policy);
        tracing::info!(rows = catalog.len(), "downloads catalogue compacted");
        Ok(catalog)
    }

    fn collect(&self, seed_url: &str, root: RawTable) -> Vec<RawTable> {
        let mut visited: HashSet<String> = HashSet::from([seed_url.to_string()]);
        let mut collected: Vec<RawTable> = Vec::new();
        let mut generation: Vec<RawTable> = vec![root.clone()];
        let mut depth = 0usize;

        loop {
            let mut next = Vec::new();
            for table in &generation {
                for row in &table.rows {
                    let url = row.subregion_url.as_str();
                    if url.is_empty() || !visited.insert(url.to_string()) {
                        continue;
                    }
                    match self.extractor.subregion_table(url) {
                        Ok(Some(found)) if !found.rows.is_empty() => next.push(found),
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(page = url, error = %err, "skipping unreadable page");
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            depth += 1;
            tracing::debug!(depth, tables = next.len(), "collected generation");
            collected.extend(next.iter().cloned());
            generation = next;
        }

        collected.push(root);
        collected
    }
}

pub fn compact_tables(tables: Vec<RawTable>, policy: &dyn DuplicatePolicy) -> Catalog {
    let mut seen: HashSet<CatalogRow> = HashSet::new();
    let rows: Vec<CatalogRow> = tables
        .into_iter()
        .flat_map(|table| table.rows)
        .filter(|row| seen.insert(row.clone()))
        .collect();

    let discard = duplicate_losers(&rows, policy);
    let rows = rows
        .into_iter()
        .enumerate()
        .filter(|(position, _)| !discard.contains(position))
        .map(|(_, row)| row)
        .collect();
    Catalog::from_rows(rows)
}

fn duplicate_losers(rows: &[CatalogRow], policy: &dyn DuplicatePolicy) -> HashSet<usize> {
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (position, row) in rows.iter().enumerate() {
        groups.entry(row.subregion.as_str()).or_default().push(position);
    }

    let mut discard = HashSet::new();
    for (name, positions) in &groups {
        if positions.len() < 2 {
            continue;
        }
        let candidates: Vec<&CatalogRow> = positions.iter().map(|&pos| &rows[pos]).collect();
        let keep = positions[policy.select(&candidates).min(positions.len() - 1)];
        tracing::debug!(region = %name, duplicates = positions.len(), "resolved duplicate rows");
        discard.extend(positions.iter().copied().filter(|&pos| pos != keep));
    }
    discard
}
