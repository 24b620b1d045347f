use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::GeofabrikError;

pub fn validate_zip(zip_path: &Path) -> Result<usize, GeofabrikError> {
    let invalid = |message: String| GeofabrikError::InvalidArchive {
        path: zip_path.display().to_string(),
        message,
    };
    let file = fs::File::open(zip_path).map_err(|err| invalid(err.to_string()))?;
    let mut archive = ZipArchive::new(file).map_err(|err| invalid(err.to_string()))?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| invalid(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|err| invalid(err.to_string()))?;
        files += 1;
    }
    Ok(files)
}
