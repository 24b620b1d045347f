use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::cache::{ArtifactCache, ArtifactKey};
use crate::catalog::{CatalogCompactor, DuplicatePolicy, KeepLargest};
use crate::client::PageSource;
use crate::config::{DEFAULT_BASE_URL, DEFAULT_INTERVAL_SECS, ResolvedConfig};
use crate::confirm::{AlwaysConfirm, Confirm};
use crate::domain::{Catalog, ContinentTable, FileFormat, Hierarchy, region_slug};
use crate::error::GeofabrikError;
use crate::fs_util::validate_zip;
use crate::hierarchy::{HierarchyBuilder, collect_continent_tables};
use crate::index::{DownloadIndexEntry, fetch_download_index};
use crate::resolver::{DEFAULT_SIMILARITY_CUTOFF, NameResolver};
use crate::store::Store;
use crate::table::HtmlTableExtractor;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub base_url: String,
    pub index_url: String,
    pub confirmation_required: bool,
    pub similarity_cutoff: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            index_url: format!("{DEFAULT_BASE_URL}index-v1.json"),
            confirmation_required: true,
            similarity_cutoff: DEFAULT_SIMILARITY_CUTOFF,
        }
    }
}

impl From<&ResolvedConfig> for AppSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            index_url: config.download_index_url(),
            confirmation_required: config.confirmation_required,
            similarity_cutoff: config.similarity_cutoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub download_dir: Option<Utf8PathBuf>,
    pub update: bool,
    pub confirmation_required: bool,
    pub deep_retry: bool,
    pub interval: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            download_dir: None,
            update: false,
            confirmation_required: true,
            deep_retry: false,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DownloadAction {
    Downloaded,
    Updated,
    AlreadyAvailable,
    Declined,
    Unavailable,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItemResult {
    pub region: String,
    pub format: FileFormat,
    pub url: Option<String>,
    pub path: Option<String>,
    #[serde(flatten)]
    pub action: DownloadAction,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItemResult>,
}

impl DownloadResult {
    pub fn count(&self, action: &DownloadAction) -> usize {
        self.items.iter().filter(|item| &item.action == action).count()
    }

    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.action, DownloadAction::Failed { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlResult {
    pub region: String,
    pub format: FileFormat,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

struct Lookup {
    catalog: Catalog,
    hierarchy: Hierarchy,
    resolver: NameResolver,
}

impl Lookup {
    fn canonicalize(&self, name: &str) -> Result<String, GeofabrikError> {
        if self.catalog.contains(name) || self.hierarchy.find(name).is_some() {
            return Ok(name.to_string());
        }
        self.resolver
            .resolve(name)
            .map(str::to_string)
            .ok_or_else(|| GeofabrikError::UnknownRegion(name.to_string()))
    }
}

pub struct App<S: PageSource> {
    store: Store,
    source: S,
    confirm: Box<dyn Confirm>,
    policy: Box<dyn DuplicatePolicy>,
    settings: AppSettings,
}

impl<S: PageSource> App<S> {
    pub fn new(store: Store, source: S, settings: AppSettings) -> Self {
        Self {
            store,
            source,
            confirm: Box::new(AlwaysConfirm),
            policy: Box::new(KeepLargest),
            settings,
        }
    }

    pub fn with_confirm(mut self, confirm: Box<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: Box<dyn DuplicatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn artifact<T, F>(
        &self,
        key: ArtifactKey,
        update: bool,
        confirmation_required: bool,
        build: F,
    ) -> Result<T, GeofabrikError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, GeofabrikError>,
    {
        let cache = ArtifactCache::new(&self.store, self.confirm.as_ref(), confirmation_required);
        cache
            .get_or_build(key, update, build)?
            .ok_or_else(|| GeofabrikError::ArtifactUnavailable(key.name().to_string()))
    }

    pub fn download_index(&self, update: bool) -> Result<Vec<DownloadIndexEntry>, GeofabrikError> {
        self.download_index_gated(update, self.settings.confirmation_required)
    }

    fn download_index_gated(
        &self,
        update: bool,
        confirmation_required: bool,
    ) -> Result<Vec<DownloadIndexEntry>, GeofabrikError> {
        self.artifact(ArtifactKey::DownloadIndex, update, confirmation_required, || {
            fetch_download_index(&self.source, &self.settings.index_url)
        })
    }

    pub fn subregion_names(&self, update: bool) -> Result<Vec<String>, GeofabrikError> {
        self.artifact(
            ArtifactKey::SubregionNames,
            update,
            self.settings.confirmation_required,
            || {
                let index = self.download_index_gated(update, false)?;
                Ok(index.into_iter().map(|entry| entry.name).collect())
            },
        )
    }

    pub fn continent_tables(&self, update: bool) -> Result<Vec<ContinentTable>, GeofabrikError> {
        self.continent_tables_gated(update, self.settings.confirmation_required)
    }

    fn continent_tables_gated(
        &self,
        update: bool,
        confirmation_required: bool,
    ) -> Result<Vec<ContinentTable>, GeofabrikError> {
        self.artifact(ArtifactKey::ContinentTables, update, confirmation_required, || {
            let extractor = HtmlTableExtractor::new(&self.source);
            let links = extractor.continent_links(&self.settings.base_url)?;
            tracing::info!(continents = links.len(), "collecting continent subregion tables");
            Ok(collect_continent_tables(&extractor, links))
        })
    }

    pub fn region_tier(&self, update: bool) -> Result<Hierarchy, GeofabrikError> {
        self.artifact(
            ArtifactKey::RegionTier,
            update,
            self.settings.confirmation_required,
            || {
                let roots = self.continent_tables_gated(update, false)?;
                let extractor = HtmlTableExtractor::new(&self.source);
                Ok(HierarchyBuilder::new(&extractor).build(&roots))
            },
        )
    }

    pub fn catalog(&self, update: bool) -> Result<Catalog, GeofabrikError> {
        self.artifact(
            ArtifactKey::DownloadCatalogue,
            update,
            self.settings.confirmation_required,
            || {
                let extractor = HtmlTableExtractor::new(&self.source);
                CatalogCompactor::with_policy(&extractor, self.policy.as_ref())
                    .compact(&self.settings.base_url)
            },
        )
    }

    pub fn resolver(&self) -> Result<NameResolver, GeofabrikError> {
        Ok(NameResolver::with_cutoff(
            self.subregion_names(false)?,
            self.settings.similarity_cutoff,
        ))
    }

    pub fn resolve_name(&self, query: &str) -> Result<String, GeofabrikError> {
        self.resolver()?
            .resolve(query)
            .map(str::to_string)
            .ok_or_else(|| GeofabrikError::UnknownRegion(query.to_string()))
    }

    fn lookup(&self) -> Result<Lookup, GeofabrikError> {
        Ok(Lookup {
            catalog: self.catalog(false)?,
            hierarchy: self.region_tier(false)?,
            resolver: self.resolver()?,
        })
    }

    pub fn download_url(&self, name: &str, format: FileFormat) -> Result<UrlResult, GeofabrikError> {
        let lookup = self.lookup()?;
        let region = lookup.canonicalize(name)?;
        let url = lookup.catalog.url(&region, format).map(str::to_string);
        Ok(UrlResult {
            region,
            format,
            url,
        })
    }

    pub fn default_filename(&self, name: &str, format: FileFormat) -> Result<String, GeofabrikError> {
        let found = self.download_url(name, format)?;
        match found.url {
            Some(url) => url_filename(&url),
            None => {
                tracing::warn!(region = %found.region, %format, "no data available for download");
                Ok(format!("{}{}", region_slug(&found.region), format.extension()))
            }
        }
    }

    pub fn default_path(
        &self,
        name: &str,
        format: FileFormat,
    ) -> Result<Option<Utf8PathBuf>, GeofabrikError> {
        let lookup = self.lookup()?;
        let region = lookup.canonicalize(name)?;
        match lookup.catalog.url(&region, format) {
            Some(url) => self.mirrored_path(&lookup, &region, url).map(Some),
            None => Ok(None),
        }
    }

    pub fn subregions_of(&self, names: &[String], deep: bool) -> Result<Vec<String>, GeofabrikError> {
        let lookup = self.lookup()?;
        if names.is_empty() {
            return Ok(lookup.hierarchy.non_subregions.clone());
        }
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for name in names {
            let region = lookup.canonicalize(name)?;
            let subregions = Self::expand(&lookup.hierarchy, &region, deep)
                .ok_or_else(|| GeofabrikError::RegionNotInTier(region.clone()))?;
            result.extend(
                subregions
                    .into_iter()
                    .filter(|subregion| seen.insert(subregion.clone())),
            );
        }
        Ok(result)
    }

    fn expand(hierarchy: &Hierarchy, region: &str, deep: bool) -> Option<Vec<String>> {
        if deep {
            hierarchy.leaf_descendants(region)
        } else {
            hierarchy.immediate_subregions(region)
        }
    }

    pub fn download(
        &self,
        names: &[String],
        format: FileFormat,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, GeofabrikError> {
        let lookup = self.lookup()?;
        let mut visited = HashSet::new();
        let mut result = DownloadResult::default();
        self.download_batch(
            &lookup,
            names,
            format,
            options.download_dir.as_deref(),
            options,
            &mut visited,
            &mut result,
            sink,
        )?;
        Ok(result)
    }

    pub fn download_sub_subregions(
        &self,
        names: &[String],
        format: FileFormat,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, GeofabrikError> {
        let subregions = self.subregions_of(names, false)?;
        let prompt = format!(
            "To download {format} data for all the following subregions:\n{}\n?",
            subregions.join("\n")
        );
        if options.confirmation_required && !self.confirm.confirm(&prompt) {
            emit(sink, "batch download cancelled".to_string());
            return Ok(DownloadResult::default());
        }
        let options = DownloadOptions {
            confirmation_required: false,
            ..options.clone()
        };
        self.download(&subregions, format, &options, sink)
    }

    #[allow(clippy::too_many_arguments)]
    fn download_batch(
        &self,
        lookup: &Lookup,
        names: &[String],
        format: FileFormat,
        target_dir: Option<&Utf8Path>,
        options: &DownloadOptions,
        visited: &mut HashSet<String>,
        result: &mut DownloadResult,
        sink: &dyn ProgressSink,
    ) -> Result<(), GeofabrikError> {
        for (position, name) in names.iter().enumerate() {
            let region = lookup.canonicalize(name)?;
            if !visited.insert(region.clone()) {
                tracing::debug!(%region, "already handled in this request");
                continue;
            }

            match lookup.catalog.url(&region, format) {
                Some(url) => {
                    let item = self.download_one(lookup, &region, format, url, target_dir, options, sink);
                    result.items.push(item);
                }
                None => {
                    let subregions = Self::expand(&lookup.hierarchy, &region, options.deep_retry)
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|subregion| *subregion != region)
                        .collect::<Vec<_>>();
                    if subregions.is_empty() {
                        emit(sink, format!("{format} data is not available for \"{region}\""));
                        result.items.push(DownloadItemResult {
                            region,
                            format,
                            url: None,
                            path: None,
                            action: DownloadAction::Unavailable,
                        });
                    } else {
                        emit(
                            sink,
                            format!(
                                "{format} data is not available for \"{region}\"; downloading the data of its {} subregions instead",
                                subregions.len()
                            ),
                        );
                        let sub_dir = self.fallback_dir(lookup, &region, format, target_dir)?;
                        self.download_batch(
                            lookup,
                            &subregions,
                            format,
                            Some(&sub_dir),
                            options,
                            visited,
                            result,
                            sink,
                        )?;
                    }
                }
            }

            if position + 1 < names.len() && !options.interval.is_zero() {
                thread::sleep(options.interval);
            }
        }
        Ok(())
    }

    fn fallback_dir(
        &self,
        lookup: &Lookup,
        region: &str,
        format: FileFormat,
        target_dir: Option<&Utf8Path>,
    ) -> Result<Utf8PathBuf, GeofabrikError> {
        let parent = match target_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let published = FileFormat::ALL
                    .into_iter()
                    .find_map(|other| lookup.catalog.url(region, other));
                match published {
                    Some(url) => {
                        let path = self.mirrored_path(lookup, region, url)?;
                        path.parent()
                            .map(Utf8Path::to_path_buf)
                            .unwrap_or_else(|| self.store.data_root().to_path_buf())
                    }
                    None => self.store.data_root().to_path_buf(),
                }
            }
        };
        Ok(parent.join(format!("{}{}", region_slug(region), format.base_extension())))
    }

    fn mirrored_path(
        &self,
        lookup: &Lookup,
        region: &str,
        url: &str,
    ) -> Result<Utf8PathBuf, GeofabrikError> {
        let parsed = Url::parse(url).map_err(|err| GeofabrikError::InvalidUrl(format!("{url}: {err}")))?;
        let mut segments: Vec<String> = parsed
            .path_segments()
            .map(|parts| parts.filter(|part| !part.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let filename = segments
            .pop()
            .ok_or_else(|| GeofabrikError::InvalidUrl(url.to_string()))?;
        if segments.is_empty() {
            segments.push(region.to_string());
        }
        let dirs: Vec<String> = segments
            .iter()
            .map(|segment| lookup.resolver.resolve_dir_segment(segment))
            .collect();
        Ok(self.store.region_dir(&dirs).join(filename))
    }

    #[allow(clippy::too_many_arguments)]
    fn download_one(
        &self,
        lookup: &Lookup,
        region: &str,
        format: FileFormat,
        url: &str,
        target_dir: Option<&Utf8Path>,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
    ) -> DownloadItemResult {
        let mut item = DownloadItemResult {
            region: region.to_string(),
            format,
            url: Some(url.to_string()),
            path: None,
            action: DownloadAction::Unavailable,
        };

        let path = match target_dir {
            Some(dir) => url_filename(url).map(|filename| dir.join(filename)),
            None => self.mirrored_path(lookup, region, url),
        };
        let path = match path {
            Ok(path) => path,
            Err(err) => {
                item.action = DownloadAction::Failed {
                    error: err.to_string(),
                };
                return item;
            }
        };
        item.path = Some(path.to_string());

        let existed = Store::exists(&path);
        if existed && !options.update {
            emit(
                sink,
                format!("\"{}\" for \"{region}\" is already available: {path}", file_name(&path)),
            );
            item.action = DownloadAction::AlreadyAvailable;
            return item;
        }

        let op = if existed { "Updating" } else { "Downloading" };
        let prompt = format!("Confirm to download the {format} data of \"{region}\"?");
        if options.confirmation_required && !self.confirm.confirm(&prompt) {
            emit(sink, format!("{} of \"{}\" has been cancelled", op, file_name(&path)));
            item.action = DownloadAction::Declined;
            return item;
        }

        emit(sink, format!("{op} \"{}\"", file_name(&path)));
        let start = Instant::now();
        match self.retrieve(url, format, &path) {
            Ok(()) => {
                let elapsed = start.elapsed();
                tracing::info!(%region, %path, elapsed_ms = elapsed.as_millis() as u64, "downloaded");
                sink.event(ProgressEvent {
                    message: format!("{op} \"{}\" done", file_name(&path)),
                    elapsed: Some(elapsed),
                });
                item.action = if existed {
                    DownloadAction::Updated
                } else {
                    DownloadAction::Downloaded
                };
            }
            Err(err) => {
                tracing::warn!(%region, %url, error = %err, "download failed");
                emit(sink, format!("{op} \"{}\" failed: {err}", file_name(&path)));
                item.action = DownloadAction::Failed {
                    error: err.to_string(),
                };
            }
        }
        item
    }

    fn retrieve(&self, url: &str, format: FileFormat, path: &Utf8Path) -> Result<(), GeofabrikError> {
        let staged = Store::staging_file(path)?;
        self.source.download_file(url, staged.path())?;
        if format == FileFormat::ShpZip {
            validate_zip(staged.path())?;
        }
        Store::persist(staged, path)
    }
}

fn url_filename(url: &str) -> Result<String, GeofabrikError> {
    let parsed = Url::parse(url).map_err(|err| GeofabrikError::InvalidUrl(format!("{url}: {err}")))?;
    parsed
        .path_segments()
        .and_then(|mut parts| parts.rfind(|part| !part.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| GeofabrikError::InvalidUrl(url.to_string()))
}

fn file_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}
