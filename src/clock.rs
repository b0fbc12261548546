//! Device clock synchronisation source.
//!
//! Mode 1 sets the device to the supervisor's own UTC time. Mode 2 estimates
//! the OSM peer's clock from the acquisition service's log: each ping frame
//! (`opcode=9`) carries the peer's time, and the log line carries ours, so
//! `utc_now - (ours - theirs)` is what the peer believes "now" to be.
//!
//! ```text
//! protocol.py[LINE:1053]# DEBUG    [2021-08-31 14:51:27,887]  server < Frame(fin=True, opcode=9, data=b'31.08.2021 14:55:54', rsv1=False)
//! ```

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ClockError;

/// Log entries older than this are not trusted for clock estimation.
const OSM_LOG_VALID_AGE_DAYS: i64 = 60;

const PEER_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where the device clock is taken from when the service is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClockSource {
    /// Leave the device clock alone.
    Disabled,
    /// Supervisor's own UTC time.
    #[default]
    SupervisorUtc,
    /// OSM peer time derived from ping frames in the service log.
    OsmLog,
}

impl TryFrom<u8> for ClockSource {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disabled),
            1 => Ok(Self::SupervisorUtc),
            2 => Ok(Self::OsmLog),
            other => Err(format!("unknown device clock source {other} (expected 0, 1 or 2)")),
        }
    }
}

impl From<ClockSource> for u8 {
    fn from(source: ClockSource) -> Self {
        match source {
            ClockSource::Disabled => 0,
            ClockSource::SupervisorUtc => 1,
            ClockSource::OsmLog => 2,
        }
    }
}

/// Parse one ping-frame log line into `(local_time, peer_time)`.
pub fn parse_ping_line(line: &str) -> Result<(NaiveDateTime, NaiveDateTime), ClockError> {
    if !line.contains("opcode=9") {
        return Err(ClockError::NotPingFrame);
    }

    let (local_part, peer_part) = line
        .split_once("Frame")
        .ok_or_else(|| ClockError::LineFormat("no Frame(...) section".to_string()))?;

    // The local timestamp sits in the last [...] before the frame, milliseconds after a comma.
    let local_str = local_part
        .rsplit('[')
        .next()
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .ok_or_else(|| ClockError::LineFormat("no local timestamp".to_string()))?;

    let peer_str = peer_part
        .split_once("data=b'")
        .and_then(|(_, rest)| rest.split('\'').next())
        .ok_or_else(|| ClockError::LineFormat("no data=b'...' field".to_string()))?;

    let peer = NaiveDateTime::parse_from_str(peer_str, PEER_TIME_FORMAT)
        .map_err(|_| ClockError::PeerTime(peer_str.to_string()))?;
    let local = NaiveDateTime::parse_from_str(local_str, LOCAL_TIME_FORMAT)
        .map_err(|_| ClockError::LocalTime(local_str.to_string()))?;

    Ok((local, peer))
}

/// Estimate the peer's current UTC time from the newest fresh ping frame.
///
/// Log files are visited newest first (by modification time) and each file's
/// lines from the end. Only the first problem encountered is logged.
pub fn osm_time_from_logs(
    dir: &Path,
    template: &str,
    local_now: NaiveDateTime,
    utc_now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let pattern = dir.join(template);
    let pattern = pattern.to_string_lossy();
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(Result::ok)
            .filter_map(|p| {
                let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((p, modified))
            })
            .collect(),
        Err(e) => {
            warn!("Clock: bad log pattern {pattern}: {e}");
            return None;
        }
    };
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut logged_problem = false;
    for (path, _) in files {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Clock: cannot read {}: {e}", path.display());
                continue;
            }
        };
        for line in content.lines().rev().filter(|l| l.contains("opcode=9")) {
            match parse_ping_line(line) {
                Ok((local, peer)) => {
                    if (local_now - local).num_days().abs() < OSM_LOG_VALID_AGE_DAYS {
                        return Some(utc_now - (local - peer));
                    }
                    if !logged_problem {
                        let name = path.file_name().map_or_else(
                            || path.display().to_string(),
                            |n| n.to_string_lossy().into_owned(),
                        );
                        info!("Clock: OSM time in log file is not fresh enough, {name}");
                        logged_problem = true;
                    }
                }
                Err(e) => {
                    if !logged_problem {
                        info!("Clock: {e}");
                        logged_problem = true;
                    }
                }
            }
        }
    }
    None
}

/// Time the device clock should be set to, or `None` when syncing is off.
pub fn target_time(
    source: ClockSource,
    data_dir: &Path,
    osm_log_template: &str,
    local_now: NaiveDateTime,
    utc_now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match source {
        ClockSource::Disabled => None,
        ClockSource::SupervisorUtc => {
            info!(
                "Clock: setting device time based on supervisor UTC {}",
                utc_now.format(PEER_TIME_FORMAT)
            );
            Some(utc_now)
        }
        ClockSource::OsmLog => {
            if let Some(t) = osm_time_from_logs(data_dir, osm_log_template, local_now, utc_now) {
                info!("Clock: setting device time based on OSM {}", t.format(PEER_TIME_FORMAT));
                Some(t)
            } else {
                info!(
                    "Clock: no usable OSM time, falling back to supervisor UTC {}",
                    utc_now.format(PEER_TIME_FORMAT)
                );
                Some(utc_now)
            }
        }
    }
}

/// Render a device timestamp the way the log expects it.
pub fn display_time(t: NaiveDateTime) -> String {
    t.format(PEER_TIME_FORMAT).to_string()
}

/// Offset between two clocks, for logging drift.
pub fn drift(device: NaiveDateTime, reference: NaiveDateTime) -> TimeDelta {
    device - reference
}
