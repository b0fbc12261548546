//! Data directory sizing.

use std::path::Path;

use tracing::debug;

use crate::error::MeasurementError;

/// Cumulative size of the files the supervised service produces.
pub trait MeasurementSource {
    /// Total size in bytes of the files in `dir` matching `pattern`.
    fn total_size(&self, dir: &Path, pattern: &str) -> Result<u64, MeasurementError>;
}

/// Sums regular files matched by a glob pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobMeasurement;

impl MeasurementSource for GlobMeasurement {
    fn total_size(&self, dir: &Path, pattern: &str) -> Result<u64, MeasurementError> {
        let full = dir.join(pattern);
        let full = full.to_string_lossy();
        let paths = glob::glob(&full).map_err(|e| MeasurementError::Pattern {
            pattern: full.to_string(),
            reason: e.to_string(),
        })?;

        let mut total = 0u64;
        for entry in paths {
            match entry {
                Ok(path) => match std::fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => total += meta.len(),
                    Ok(_) => {}
                    // Files may vanish between listing and stat (log rotation etc).
                    Err(e) => debug!("Measurement: skipping {}: {e}", path.display()),
                },
                Err(e) => debug!("Measurement: unreadable entry: {e}"),
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_size_matches_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b.txt"), vec![0u8; 50]).unwrap();
        std::fs::write(dir.path().join("c.log"), vec![0u8; 1000]).unwrap();
        std::fs::create_dir(dir.path().join("d.txt")).unwrap();

        let size = GlobMeasurement.total_size(dir.path(), "*.txt").unwrap();
        assert_eq!(size, 150);
    }

    #[test]
    fn test_total_size_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(GlobMeasurement.total_size(dir.path(), "*.txt").unwrap(), 0);
    }

    #[test]
    fn test_total_size_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = GlobMeasurement.total_size(dir.path(), "[*.txt").unwrap_err();
        assert!(matches!(err, MeasurementError::Pattern { .. }));
    }
}
