use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::confirm::Confirm;
use crate::error::GeofabrikError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
    DownloadIndex,
    SubregionNames,
    ContinentTables,
    RegionTier,
    DownloadCatalogue,
}

impl ArtifactKey {
    pub const ALL: [ArtifactKey; 5] = [
        ArtifactKey::DownloadIndex,
        ArtifactKey::SubregionNames,
        ArtifactKey::ContinentTables,
        ArtifactKey::RegionTier,
        ArtifactKey::DownloadCatalogue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ArtifactKey::DownloadIndex => "GeoFabrik index of all downloads",
            ArtifactKey::SubregionNames => "GeoFabrik subregion name list",
            ArtifactKey::ContinentTables => "GeoFabrik continent subregions",
            ArtifactKey::RegionTier => "GeoFabrik region-subregion tier",
            ArtifactKey::DownloadCatalogue => "GeoFabrik downloads catalogue",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name().replace(' ', "-"))
    }

    fn prompt(self) -> String {
        match self {
            ArtifactKey::RegionTier | ArtifactKey::DownloadCatalogue => {
                format!("To compile {}? (Note this may take up to a few minutes.)", self.name())
            }
            _ => format!("To get {}?", self.name()),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait ArtifactStore {
    fn load(&self, key: ArtifactKey) -> Result<Option<Vec<u8>>, GeofabrikError>;
    fn save(&self, key: ArtifactKey, content: &[u8]) -> Result<(), GeofabrikError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    key: String,
    tool_version: String,
    built_at: DateTime<Utc>,
    payload: T,
}

pub struct ArtifactCache<'a, S: ArtifactStore + ?Sized> {
    store: &'a S,
    confirm: &'a dyn Confirm,
    confirmation_required: bool,
}

impl<'a, S: ArtifactStore + ?Sized> ArtifactCache<'a, S> {
    pub fn new(store: &'a S, confirm: &'a dyn Confirm, confirmation_required: bool) -> Self {
        Self {
            store,
            confirm,
            confirmation_required,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: ArtifactKey) -> Result<Option<T>, GeofabrikError> {
        let Some(bytes) = self.store.load(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Envelope<T>>(&bytes) {
            Ok(envelope) => {
                tracing::debug!(artifact = %key, built_at = %envelope.built_at, "cache hit");
                Ok(Some(envelope.payload))
            }
            Err(err) => {
                tracing::warn!(artifact = %key, error = %err, "discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: ArtifactKey, value: &T) -> Result<(), GeofabrikError> {
        let envelope = Envelope {
            key: key.name().to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            built_at: Utc::now(),
            payload: value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|err| GeofabrikError::CacheCorrupt {
            key: key.name().to_string(),
            message: err.to_string(),
        })?;
        self.store.save(key, &bytes)?;
        tracing::info!(artifact = %key, bytes = bytes.len(), "saved");
        Ok(())
    }

    /// `Ok(None)` means the build was declined at the confirmation gate.
    pub fn get_or_build<T, F>(
        &self,
        key: ArtifactKey,
        update: bool,
        build: F,
    ) -> Result<Option<T>, GeofabrikError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, GeofabrikError>,
    {
        if !update {
            if let Some(value) = self.get(key)? {
                return Ok(Some(value));
            }
        }

        if self.confirmation_required && !self.confirm.confirm(&key.prompt()) {
            tracing::info!(artifact = %key, "build declined");
            return Ok(None);
        }

        tracing::info!(artifact = %key, update, "building");
        let value = build()?;
        self.put(key, &value)?;
        Ok(Some(value))
    }
}
