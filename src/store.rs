use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::{Builder, NamedTempFile};

use crate::cache::{ArtifactKey, ArtifactStore};
use crate::error::GeofabrikError;

#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new() -> Result<Self, GeofabrikError> {
        Ok(Self {
            data_root: default_data_root()?,
            cache_root: default_cache_root()?,
        })
    }

    pub fn new_with_paths(data_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            data_root,
            cache_root,
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn artifact_path(&self, key: ArtifactKey) -> Utf8PathBuf {
        self.cache_root.join(key.file_name())
    }

    pub fn region_dir<S: AsRef<str>>(&self, segments: &[S]) -> Utf8PathBuf {
        let mut dir = self.data_root.clone();
        for segment in segments {
            dir.push(segment.as_ref());
        }
        dir
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), GeofabrikError> {
        fs::create_dir_all(path.as_std_path()).map_err(GeofabrikError::fs)
    }

    pub fn exists(path: &Utf8Path) -> bool {
        path.as_std_path().is_file()
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GeofabrikError> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content).map_err(GeofabrikError::fs)?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path()).map_err(GeofabrikError::fs)?;
        Ok(())
    }

    pub fn staging_file(dest: &Utf8Path) -> Result<NamedTempFile, GeofabrikError> {
        let parent = dest
            .parent()
            .ok_or_else(|| GeofabrikError::Filesystem("invalid destination path".to_string()))?;
        Self::ensure_dir(parent)?;
        Builder::new()
            .prefix(".geofabrik-download")
            .tempfile_in(parent.as_std_path())
            .map_err(GeofabrikError::fs)
    }

    pub fn persist(staged: NamedTempFile, dest: &Utf8Path) -> Result<(), GeofabrikError> {
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path()).map_err(GeofabrikError::fs)?;
        }
        staged
            .persist(dest.as_std_path())
            .map_err(|err| GeofabrikError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl ArtifactStore for Store {
    fn load(&self, key: ArtifactKey) -> Result<Option<Vec<u8>>, GeofabrikError> {
        let path = self.artifact_path(key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        fs::read(path.as_std_path())
            .map(Some)
            .map_err(GeofabrikError::fs)
    }

    fn save(&self, key: ArtifactKey, content: &[u8]) -> Result<(), GeofabrikError> {
        Self::write_bytes_atomic(&self.artifact_path(key), content)
    }
}

pub fn default_data_root() -> Result<Utf8PathBuf, GeofabrikError> {
    let cwd = std::env::current_dir().map_err(GeofabrikError::fs)?;
    Utf8PathBuf::from_path_buf(cwd.join("osm_geofabrik"))
        .map_err(|_| GeofabrikError::Filesystem("invalid data path".to_string()))
}

pub fn default_cache_root() -> Result<Utf8PathBuf, GeofabrikError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("geofabrik-fetch")).ok()
        })
        .ok_or_else(|| GeofabrikError::Filesystem("unable to resolve cache directory".to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_store(temp: &tempfile::TempDir) -> Store {
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Store::new_with_paths(root.join("data"), root.join("cache"))
    }

    #[test]
    fn layout_paths() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        let dir = store.region_dir(&["Europe", "Great Britain"]);
        assert!(dir.ends_with("data/Europe/Great Britain"));
        let artifact = store.artifact_path(ArtifactKey::DownloadCatalogue);
        assert!(artifact.ends_with("cache/GeoFabrik-downloads-catalogue.json"));
    }

    #[test]
    fn artifacts_round_trip_through_disk() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        assert!(store.load(ArtifactKey::SubregionNames).unwrap().is_none());
        store.save(ArtifactKey::SubregionNames, b"[]").unwrap();
        assert_eq!(
            store.load(ArtifactKey::SubregionNames).unwrap(),
            Some(b"[]".to_vec())
        );
    }

    #[test]
    fn staged_file_replaces_existing() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp_store(&temp);
        let dest = store.region_dir(&["Europe"]).join("malta-latest.osm.pbf");
        Store::write_bytes_atomic(&dest, b"old").unwrap();

        let mut staged = Store::staging_file(&dest).unwrap();
        staged.write_all(b"new").unwrap();
        Store::persist(staged, &dest).unwrap();

        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"new");
    }
}
