//! Instrument descriptor file (`instrument_description.json`).
//!
//! Written by the acquisition service next to its data; the supervisor only
//! needs the instrument address from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::DescriptorError;

const MIN_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Instrument IP address or host name.
    #[serde(rename = "IP_address")]
    pub address: String,
    /// Everything else in the file, kept for the startup log.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceDescriptor {
    pub async fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DescriptorError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(DescriptorError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| DescriptorError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Poll `path` until it holds a valid descriptor.
pub async fn wait_for_descriptor(path: &Path, poll: Duration) -> DeviceDescriptor {
    let poll = poll.max(MIN_POLL);
    loop {
        match DeviceDescriptor::load(path).await {
            Ok(descriptor) => {
                info!(
                    "Descriptor: loaded {} ({})",
                    path.display(),
                    serde_json::to_string(&descriptor).unwrap_or_default()
                );
                return descriptor;
            }
            Err(e) => {
                warn!("Descriptor: {e}, retrying in {}s", poll.as_secs_f64());
                tokio::time::sleep(poll).await;
            }
        }
    }
}
