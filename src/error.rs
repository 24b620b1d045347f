use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GeofabrikError {
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to parse page {url}: {message}")]
    PageParse { url: String, message: String },

    #[error("failed to parse download index: {0}")]
    IndexParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("cache entry \"{key}\" is unreadable: {message}")]
    #[diagnostic(help("re-run with --update to rebuild it"))]
    CacheCorrupt { key: String, message: String },

    #[error("the input region name \"{0}\" is not identified")]
    #[diagnostic(help("check that the region exists in the catalogue and retry"))]
    UnknownRegion(String),

    #[error("region \"{0}\" is listed in the catalogue but absent from the region tier")]
    RegionNotInTier(String),

    #[error("unknown file format: {0}")]
    #[diagnostic(help("use one of .osm.pbf, .shp.zip, .osm.bz2"))]
    UnknownFormat(String),

    #[error("no data of {0} is available")]
    #[diagnostic(help("the build was declined; re-run and confirm, or pass --yes"))]
    ArtifactUnavailable(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid archive {path}: {message}")]
    InvalidArchive { path: String, message: String },
}

impl GeofabrikError {
    pub(crate) fn http(url: &str, err: impl ToString) -> Self {
        GeofabrikError::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn fs(err: impl ToString) -> Self {
        GeofabrikError::Filesystem(err.to_string())
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            GeofabrikError::Http { .. }
                | GeofabrikError::HttpStatus { .. }
                | GeofabrikError::PageParse { .. }
                | GeofabrikError::IndexParse(_)
        )
    }
}
