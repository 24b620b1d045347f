use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::client::PageSource;
use crate::domain::FileFormat;
use crate::error::GeofabrikError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadIndexEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub iso3166_1_alpha2: Vec<String>,
    #[serde(default)]
    pub iso3166_2: Vec<String>,
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
}

impl DownloadIndexEntry {
    pub fn url(&self, format: FileFormat) -> Option<&str> {
        self.urls.get(format.index_key()).map(String::as_str)
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    properties: FeatureProperties,
}

#[derive(Deserialize)]
struct FeatureProperties {
    id: String,
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default, rename = "iso3166-1:alpha2")]
    iso3166_1_alpha2: Vec<String>,
    #[serde(default, rename = "iso3166-2")]
    iso3166_2: Vec<String>,
    #[serde(default)]
    urls: BTreeMap<String, String>,
}

pub fn parse_download_index(json: &str) -> Result<Vec<DownloadIndexEntry>, GeofabrikError> {
    let collection: FeatureCollection =
        serde_json::from_str(json).map_err(|err| GeofabrikError::IndexParse(err.to_string()))?;
    Ok(collection
        .features
        .into_iter()
        .map(|feature| {
            let props = feature.properties;
            DownloadIndexEntry {
                id: props.id,
                // Polish voivodeship names carry an HTML line break.
                name: props.name.replace("<br />", " "),
                parent: props.parent,
                iso3166_1_alpha2: props.iso3166_1_alpha2,
                iso3166_2: props.iso3166_2,
                urls: props.urls,
            }
        })
        .collect())
}

pub fn fetch_download_index<S: PageSource + ?Sized>(
    source: &S,
    index_url: &str,
) -> Result<Vec<DownloadIndexEntry>, GeofabrikError> {
    tracing::info!(url = index_url, "fetching download index");
    let json = source.fetch_page(index_url)?;
    parse_download_index(&json)
}
