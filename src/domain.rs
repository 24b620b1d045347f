use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GeofabrikError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum FileFormat {
    #[serde(rename = ".osm.pbf")]
    #[value(name = "osm.pbf", alias = "pbf", alias = ".osm.pbf")]
    OsmPbf,
    #[serde(rename = ".shp.zip")]
    #[value(name = "shp.zip", alias = "shp", alias = ".shp.zip")]
    ShpZip,
    #[serde(rename = ".osm.bz2")]
    #[value(name = "osm.bz2", alias = "bz2", alias = ".osm.bz2")]
    OsmBz2,
}

impl FileFormat {
    pub const ALL: [FileFormat; 3] = [FileFormat::OsmPbf, FileFormat::ShpZip, FileFormat::OsmBz2];

    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::OsmPbf => ".osm.pbf",
            FileFormat::ShpZip => ".shp.zip",
            FileFormat::OsmBz2 => ".osm.bz2",
        }
    }

    pub fn base_extension(self) -> &'static str {
        match self {
            FileFormat::OsmPbf | FileFormat::OsmBz2 => ".osm",
            FileFormat::ShpZip => ".shp",
        }
    }

    pub fn link_text(self) -> String {
        format!("[{}]", self.extension())
    }

    pub fn index_key(self) -> &'static str {
        match self {
            FileFormat::OsmPbf => "pbf",
            FileFormat::ShpZip => "shp",
            FileFormat::OsmBz2 => "bz2",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for FileFormat {
    type Err = GeofabrikError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "osm.pbf" | "pbf" => Ok(FileFormat::OsmPbf),
            "shp.zip" | "shp" => Ok(FileFormat::ShpZip),
            "osm.bz2" | "bz2" => Ok(FileFormat::OsmBz2),
            _ => Err(GeofabrikError::UnknownFormat(value.to_string())),
        }
    }
}

pub fn region_slug(name: &str) -> String {
    name.trim().replace(' ', "-").to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogRow {
    pub subregion: String,
    pub subregion_url: String,
    pub osm_pbf: Option<String>,
    pub osm_pbf_size: Option<String>,
    pub shp_zip: Option<String>,
    pub osm_bz2: Option<String>,
}

impl CatalogRow {
    pub fn new(subregion: impl Into<String>, subregion_url: impl Into<String>) -> Self {
        Self {
            subregion: subregion.into(),
            subregion_url: subregion_url.into(),
            osm_pbf: None,
            osm_pbf_size: None,
            shp_zip: None,
            osm_bz2: None,
        }
    }

    pub fn url(&self, format: FileFormat) -> Option<&str> {
        match format {
            FileFormat::OsmPbf => self.osm_pbf.as_deref(),
            FileFormat::ShpZip => self.shp_zip.as_deref(),
            FileFormat::OsmBz2 => self.osm_bz2.as_deref(),
        }
    }

    pub fn set_url(&mut self, format: FileFormat, url: Option<String>) {
        match format {
            FileFormat::OsmPbf => self.osm_pbf = url,
            FileFormat::ShpZip => self.shp_zip = url,
            FileFormat::OsmBz2 => self.osm_bz2 = url,
        }
    }

    pub fn pbf_size_bytes(&self) -> Option<u64> {
        self.osm_pbf_size.as_deref().and_then(parse_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub page_url: String,
    pub rows: Vec<CatalogRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentTable {
    pub name: String,
    pub url: String,
    pub table: Option<RawTable>,
}

/// Units are decimal (`kB` = 1000) unless written in binary form (`KiB`).
pub fn parse_size(raw: &str) -> Option<u64> {
    let cleaned = raw
        .replace('\u{a0}', " ")
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim()
        .to_string();
    let split = cleaned
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == ','))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    let number: f64 = number.replace(',', "").parse().ok()?;
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" | "bytes" => 1.0,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "t" | "tb" => 1e12,
        "kib" => 1024.0,
        "mib" => 1024.0 * 1024.0,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        "tib" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * multiplier).round() as u64)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<CatalogRow>", into = "Vec<CatalogRow>")]
pub struct Catalog {
    rows: Vec<CatalogRow>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_rows(rows: Vec<CatalogRow>) -> Self {
        let mut index = HashMap::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            index.entry(row.subregion.clone()).or_insert(position);
        }
        Self { rows, index }
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, subregion: &str) -> Option<&CatalogRow> {
        self.index.get(subregion).map(|&position| &self.rows[position])
    }

    pub fn contains(&self, subregion: &str) -> bool {
        self.index.contains_key(subregion)
    }

    pub fn url(&self, subregion: &str, format: FileFormat) -> Option<&str> {
        self.get(subregion).and_then(|row| row.url(format))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.subregion.as_str())
    }
}

impl From<Vec<CatalogRow>> for Catalog {
    fn from(rows: Vec<CatalogRow>) -> Self {
        Self::from_rows(rows)
    }
}

impl From<Catalog> for Vec<CatalogRow> {
    fn from(catalog: Catalog) -> Self {
        catalog.rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "regions", rename_all = "snake_case")]
pub enum Subregions {
    Leaf,
    Nested(Vec<RegionNode>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionNode {
    pub name: String,
    pub children: Subregions,
}

impl RegionNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Subregions::Leaf,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.children, Subregions::Leaf)
    }

    pub fn children(&self) -> &[RegionNode] {
        match &self.children {
            Subregions::Leaf => &[],
            Subregions::Nested(children) => children,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub regions: Vec<RegionNode>,
    pub non_subregions: Vec<String>,
}

impl Hierarchy {
    pub fn find(&self, name: &str) -> Option<&RegionNode> {
        let mut stack: Vec<&RegionNode> = self.regions.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if node.name == name {
                return Some(node);
            }
            stack.extend(node.children().iter().rev());
        }
        None
    }

    pub fn is_leaf(&self, name: &str) -> bool {
        self.non_subregions.iter().any(|leaf| leaf == name)
    }

    pub fn immediate_subregions(&self, name: &str) -> Option<Vec<String>> {
        let node = self.find(name)?;
        if node.is_leaf() {
            return Some(vec![node.name.clone()]);
        }
        Some(node.children().iter().map(|child| child.name.clone()).collect())
    }

    pub fn leaf_descendants(&self, name: &str) -> Option<Vec<String>> {
        let node = self.find(name)?;
        let mut visited = HashSet::new();
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.name.as_str()) {
                continue;
            }
            if current.is_leaf() {
                leaves.push(current.name.clone());
            } else {
                stack.extend(current.children().iter().rev());
            }
        }
        Some(leaves)
    }

    pub fn walk(&self) -> Vec<&RegionNode> {
        let mut nodes = Vec::new();
        let mut stack: Vec<&RegionNode> = self.regions.iter().rev().collect();
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children().iter().rev());
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Hierarchy {
        Hierarchy {
            regions: vec![
                RegionNode {
                    name: "Europe".to_string(),
                    children: Subregions::Nested(vec![
                        RegionNode {
                            name: "Great Britain".to_string(),
                            children: Subregions::Nested(vec![
                                RegionNode::leaf("England"),
                                RegionNode::leaf("Scotland"),
                                RegionNode::leaf("Wales"),
                            ]),
                        },
                        RegionNode::leaf("Malta"),
                    ]),
                },
                RegionNode::leaf("Antarctica"),
            ],
            non_subregions: vec![
                "Antarctica".to_string(),
                "England".to_string(),
                "Scotland".to_string(),
                "Wales".to_string(),
                "Malta".to_string(),
            ],
        }
    }

    #[test]
    fn parse_sizes() {
        assert_eq!(parse_size("(1.2\u{a0}GB)"), Some(1_200_000_000));
        assert_eq!(parse_size("713 MB"), Some(713_000_000));
        assert_eq!(parse_size("52.3 kB"), Some(52_300));
        assert_eq!(parse_size("2 MiB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("n/a"), None);
    }

    #[test]
    fn format_from_str() {
        assert_eq!("pbf".parse::<FileFormat>().unwrap(), FileFormat::OsmPbf);
        assert_eq!(".SHP.ZIP".parse::<FileFormat>().unwrap(), FileFormat::ShpZip);
        assert_eq!("osm.bz2".parse::<FileFormat>().unwrap(), FileFormat::OsmBz2);
        assert!("geojson".parse::<FileFormat>().is_err());
        assert_eq!(FileFormat::ShpZip.base_extension(), ".shp");
    }

    #[test]
    fn hierarchy_queries() {
        let hierarchy = sample();
        assert_eq!(
            hierarchy.immediate_subregions("Europe").unwrap(),
            vec!["Great Britain", "Malta"]
        );
        assert_eq!(
            hierarchy.immediate_subregions("Malta").unwrap(),
            vec!["Malta"]
        );
        assert_eq!(
            hierarchy.leaf_descendants("Europe").unwrap(),
            vec!["England", "Scotland", "Wales", "Malta"]
        );
        let walked: Vec<&str> = hierarchy
            .walk()
            .iter()
            .map(|node| node.name.as_str())
            .collect();
        assert_eq!(
            walked,
            vec!["Europe", "Great Britain", "England", "Scotland", "Wales", "Malta", "Antarctica"]
        );
        assert!(hierarchy.find("Atlantis").is_none());
    }

    #[test]
    fn catalog_serde_rebuilds_index() {
        let mut row = CatalogRow::new("Malta", "https://download.geofabrik.de/europe/malta.html");
        row.osm_pbf = Some("https://download.geofabrik.de/europe/malta-latest.osm.pbf".to_string());
        let catalog = Catalog::from_rows(vec![row]);
        let json = serde_json::to_string(&catalog).unwrap();
        let restored: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, catalog);
        assert!(restored.url("Malta", FileFormat::OsmPbf).is_some());
        assert!(restored.url("Malta", FileFormat::ShpZip).is_none());
    }
}
