//! Spectrum snapshots written to the data directory after each restart.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::device::Spectrum;

const FILE_SUFFIX: &str = "_spectrum.txt";

/// `<dir>/%Y%m%d%H%M%S_spectrum.txt` for the given local time.
pub fn snapshot_path(dir: &Path, local_time: NaiveDateTime) -> PathBuf {
    dir.join(format!("{}{FILE_SUFFIX}", local_time.format("%Y%m%d%H%M%S")))
}

/// Write `spectrum` as tab-separated text and return the file path.
pub async fn save_spectrum(
    dir: &Path,
    spectrum: &Spectrum,
    local_time: NaiveDateTime,
) -> std::io::Result<PathBuf> {
    let path = snapshot_path(dir, local_time);
    tokio::fs::write(&path, spectrum.to_tsv()).await?;
    Ok(path)
}
