use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use geofabrik_fetch::app::{App, AppSettings};
use geofabrik_fetch::catalog::CatalogCompactor;
use geofabrik_fetch::client::PageSource;
use geofabrik_fetch::domain::{CatalogRow, ContinentTable, Hierarchy, RawTable, Subregions};
use geofabrik_fetch::error::GeofabrikError;
use geofabrik_fetch::hierarchy::HierarchyBuilder;
use geofabrik_fetch::store::Store;
use geofabrik_fetch::table::PageTableExtractor;

const BASE: &str = "https://download.geofabrik.de/";

#[derive(Default)]
struct MockExtractor {
    tables: HashMap<String, RawTable>,
    failing: HashSet<String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockExtractor {
    fn page(mut self, page: &str, rows: &[(&str, &str, Option<&str>)]) -> Self {
        let url = format!("{BASE}{page}");
        let rows = rows
            .iter()
            .map(|(name, link, size)| {
                let mut row = CatalogRow::new(*name, format!("{BASE}{link}"));
                row.osm_pbf_size = size.map(str::to_string);
                row
            })
            .collect();
        self.tables.insert(
            url.clone(),
            RawTable {
                page_url: url,
                rows,
            },
        );
        self
    }

    fn fail(mut self, page: &str) -> Self {
        self.failing.insert(format!("{BASE}{page}"));
        self
    }

    fn calls(&self, page: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&format!("{BASE}{page}"))
            .copied()
            .unwrap_or(0)
    }
}

impl PageTableExtractor for MockExtractor {
    fn subregion_table(&self, page_url: &str) -> Result<Option<RawTable>, GeofabrikError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(page_url.to_string())
            .or_default() += 1;
        if self.failing.contains(page_url) {
            return Err(GeofabrikError::Http {
                url: page_url.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self.tables.get(page_url).cloned())
    }
}

fn continent(extractor: &MockExtractor, name: &str, page: &str) -> ContinentTable {
    let url = format!("{BASE}{page}");
    ContinentTable {
        name: name.to_string(),
        table: extractor.tables.get(&url).cloned(),
        url,
    }
}

fn child_names(subregions: &Subregions) -> Vec<&str> {
    match subregions {
        Subregions::Leaf => Vec::new(),
        Subregions::Nested(children) => children.iter().map(|child| child.name.as_str()).collect(),
    }
}

#[test]
fn hierarchy_keeps_cross_listed_regions_once() {
    let extractor = MockExtractor::default()
        .page(
            "europe.html",
            &[
                ("Great Britain", "europe/great-britain.html", None),
                ("Malta", "europe/malta.html", None),
                ("Russian Federation", "russia.html", None),
            ],
        )
        .page(
            "asia.html",
            &[
                ("Russian Federation", "russia.html", None),
                ("Japan", "asia/japan.html", None),
            ],
        )
        .page(
            "europe/great-britain.html",
            &[
                ("England", "europe/great-britain/england.html", None),
                ("Scotland", "europe/great-britain/scotland.html", None),
                ("Wales", "europe/great-britain/wales.html", None),
            ],
        )
        .page("asia/japan.html", &[("Kyushu", "asia/japan/kyushu.html", None)])
        .fail("russia.html");
    let roots = vec![
        continent(&extractor, "Europe", "europe.html"),
        continent(&extractor, "Asia", "asia.html"),
        continent(&extractor, "Antarctica", "antarctica.html"),
    ];

    let tier = HierarchyBuilder::new(&extractor).build(&roots);

    let top: Vec<&str> = tier.regions.iter().map(|node| node.name.as_str()).collect();
    assert_eq!(top, vec!["Europe", "Asia", "Antarctica"]);
    assert_eq!(
        child_names(&tier.regions[0].children),
        vec!["Great Britain", "Malta", "Russian Federation"]
    );
    assert_eq!(child_names(&tier.regions[1].children), vec!["Japan"]);
    assert!(tier.regions[2].is_leaf());
    assert_eq!(
        tier.non_subregions,
        vec![
            "Antarctica",
            "Malta",
            "Russian Federation",
            "England",
            "Scotland",
            "Wales",
            "Kyushu"
        ]
    );
    // the failing page degrades to a leaf and is not asked for again from Asia
    assert_eq!(extractor.calls("russia.html"), 1);
    assert!(tier.is_leaf("Russian Federation"));
    assert_eq!(internal_names(&tier), vec!["Europe", "Great Britain", "Asia", "Japan"]);
    assert_leaves_complement_internal_nodes(&tier);
}

#[test]
fn region_with_only_cross_listed_children_becomes_leaf() {
    let extractor = MockExtractor::default()
        .page("europe.html", &[("Russian Federation", "russia.html", None)])
        .page("asia.html", &[("Russian Federation", "russia.html", None)]);
    let roots = vec![
        continent(&extractor, "Europe", "europe.html"),
        continent(&extractor, "Asia", "asia.html"),
    ];

    let tier = HierarchyBuilder::new(&extractor).build(&roots);

    assert!(tier.regions[1].is_leaf());
    assert_eq!(tier.non_subregions, vec!["Russian Federation", "Asia"]);
    assert_eq!(tier.immediate_subregions("Asia"), Some(vec!["Asia".to_string()]));
    assert_leaves_complement_internal_nodes(&tier);
}

fn catalog_extractor() -> MockExtractor {
    MockExtractor::default()
        .page(
            "",
            &[
                ("Europe", "europe.html", Some("25 GB")),
                ("Asia", "asia.html", Some("12 GB")),
            ],
        )
        .page(
            "europe.html",
            &[
                ("Malta", "europe/malta.html", Some("6 MB")),
                ("Russian Federation", "russia.html", Some("3.1 GB")),
            ],
        )
        .page(
            "asia.html",
            &[
                ("Russian Federation", "russia.html", Some("2.9 GB")),
                ("Europe", "europe.html", None),
            ],
        )
}

#[test]
fn compactor_dedups_and_appends_root_last() {
    let extractor = catalog_extractor();

    let catalog = CatalogCompactor::new(&extractor).compact(BASE).unwrap();

    assert_eq!(
        catalog.names().collect::<Vec<_>>(),
        vec!["Malta", "Russian Federation", "Europe", "Asia"]
    );
    assert_eq!(
        catalog.get("Russian Federation").unwrap().osm_pbf_size.as_deref(),
        Some("3.1 GB")
    );
    assert_eq!(catalog.get("Europe").unwrap().osm_pbf_size.as_deref(), Some("25 GB"));
    // europe.html is linked from both the root and asia.html
    assert_eq!(extractor.calls("europe.html"), 1);
    assert_eq!(extractor.calls("russia.html"), 1);
}

#[test]
fn compactor_requires_a_root_table() {
    let extractor = MockExtractor::default();
    let err = CatalogCompactor::new(&extractor).compact(BASE).unwrap_err();
    assert_matches!(err, GeofabrikError::PageParse { .. });
}

const HOME: &str = r#"<html><body><table>
<tr><th>Sub Region</th><th>Quick Links</th></tr>
<tr><td class="subregion"><a href="europe.html">Europe</a></td>
<td><a href="europe-latest.osm.pbf">[.osm.pbf]</a></td><td>(25 GB)</td></tr>
</table></body></html>"#;

const EUROPE: &str = r#"<html><body><table>
<tr><th>Sub Region</th><th>Quick Links</th></tr>
<tr><td class="subregion"><a href="europe/malta.html">Malta</a></td>
<td><a href="europe/malta-latest.osm.pbf">[.osm.pbf]</a></td><td>(6 MB)</td>
<td><a href="europe/malta-latest-free.shp.zip">[.shp.zip]</a></td></tr>
</table></body></html>"#;

const MALTA: &str = "<html><body><h1>Malta</h1><p>No subregions.</p></body></html>";

const INDEX: &str = r#"{"type":"FeatureCollection","features":[
{"type":"Feature","properties":{"id":"europe","name":"Europe","urls":{"pbf":"https://download.geofabrik.de/europe-latest.osm.pbf"}},"geometry":null},
{"type":"Feature","properties":{"id":"malta","name":"Malta","parent":"europe","iso3166-1:alpha2":["MT"],"urls":{"pbf":"https://download.geofabrik.de/europe/malta-latest.osm.pbf"}},"geometry":null}
]}"#;

#[derive(Default)]
struct HtmlSite {
    fetches: Mutex<Vec<String>>,
}

impl HtmlSite {
    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

impl PageSource for HtmlSite {
    fn fetch_page(&self, url: &str) -> Result<String, GeofabrikError> {
        self.fetches.lock().unwrap().push(url.to_string());
        let page = url.strip_prefix(BASE).unwrap_or(url);
        let body = match page {
            "" => HOME,
            "europe.html" => EUROPE,
            "europe/malta.html" => MALTA,
            "index-v1.json" => INDEX,
            _ => {
                return Err(GeofabrikError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                    message: "Not Found".to_string(),
                });
            }
        };
        Ok(body.to_string())
    }

    fn download_file(&self, url: &str, _destination: &Path) -> Result<(), GeofabrikError> {
        Err(GeofabrikError::Http {
            url: url.to_string(),
            message: "downloads are not served".to_string(),
        })
    }
}

fn site_app(temp: &tempfile::TempDir, settings: AppSettings) -> App<HtmlSite> {
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join("data"), root.join("cache"));
    App::new(store, HtmlSite::default(), settings)
}

fn unattended() -> AppSettings {
    AppSettings {
        confirmation_required: false,
        ..AppSettings::default()
    }
}

#[test]
fn artifacts_are_built_once_then_served_from_cache() {
    let temp = tempfile::tempdir().unwrap();
    let app = site_app(&temp, unattended());

    let tier = app.region_tier(false).unwrap();
    let catalog = app.catalog(false).unwrap();
    let names = app.subregion_names(false).unwrap();
    let fetched = app.source().fetch_count();
    assert!(fetched > 0);

    assert_eq!(app.region_tier(false).unwrap(), tier);
    assert_eq!(app.catalog(false).unwrap().rows(), catalog.rows());
    assert_eq!(app.subregion_names(false).unwrap(), names);
    assert_eq!(app.source().fetch_count(), fetched, "cached artifacts need no requests");

    assert_eq!(tier.non_subregions, vec!["Malta"]);
    assert_eq!(names, vec!["Europe", "Malta"]);
    assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["Malta", "Europe"]);
    assert_eq!(
        catalog.url("Malta", geofabrik_fetch::domain::FileFormat::ShpZip),
        Some("https://download.geofabrik.de/europe/malta-latest-free.shp.zip")
    );

    app.region_tier(true).unwrap();
    assert!(app.source().fetch_count() > fetched, "update rebuilds from the server");
}

#[test]
fn every_tier_region_is_in_the_catalogue() {
    let temp = tempfile::tempdir().unwrap();
    let app = site_app(&temp, unattended());

    let tier = app.region_tier(false).unwrap();
    let catalog = app.catalog(false).unwrap();
    for node in tier.walk() {
        assert!(catalog.contains(&node.name), "{} missing", node.name);
    }
    assert_leaves_complement_internal_nodes(&tier);
}

fn assert_leaves_complement_internal_nodes(tier: &Hierarchy) {
    let internal: HashSet<String> = internal_names(tier).into_iter().collect();
    let leaves: HashSet<String> = tier.non_subregions.iter().cloned().collect();
    let all: HashSet<String> = tier.walk().into_iter().map(|node| node.name.clone()).collect();

    assert!(internal.is_disjoint(&leaves), "{:?}", internal.intersection(&leaves).collect::<Vec<_>>());
    assert_eq!(internal.union(&leaves).cloned().collect::<HashSet<_>>(), all);
    assert_eq!(leaves.len(), tier.non_subregions.len(), "leaf list has duplicates");
}

#[test]
fn declined_build_makes_no_requests() {
    let temp = tempfile::tempdir().unwrap();
    let app = site_app(&temp, AppSettings::default()).with_confirm(Box::new(|_: &str| false));

    let err = app.catalog(false).unwrap_err();

    assert_matches!(err, GeofabrikError::ArtifactUnavailable(_));
    assert_eq!(app.source().fetch_count(), 0);
}

#[test]
fn resolver_uses_cached_names() {
    let temp = tempfile::tempdir().unwrap();
    let app = site_app(&temp, unattended());

    assert_eq!(app.resolve_name("malta").unwrap(), "Malta");
    assert_eq!(
        app.resolve_name("https://download.geofabrik.de/europe/malta-latest.osm.pbf")
            .unwrap(),
        "Malta"
    );
    assert_matches!(
        app.resolve_name("qqqqqqq"),
        Err(GeofabrikError::UnknownRegion(_))
    );
}

fn internal_names(tier: &Hierarchy) -> Vec<String> {
    tier.walk()
        .into_iter()
        .filter(|node| !node.is_leaf())
        .map(|node| node.name.clone())
        .collect()
}
