//! Device identity resolution
//!
//! Without a configured terminal id the device id is derived from the host's
//! hardware address, so discovery entities keep their ids across restarts.

use md5::{Digest, Md5};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const ID_PREFIX: &str = "mdmt2_";
const FINGERPRINT_LEN: usize = 6;
const NET_CLASS_DIR: &str = "/sys/class/net";
const MACHINE_ID_FILE: &str = "/etc/machine-id";
const FALLBACK_HOST_KEY: &str = "0";

/// Identity block shared by every discovery payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub firmware_version: String,
}

/// Returns the configured id verbatim, or the host fingerprint id when none is set
pub fn resolve(configured_id: Option<&str>) -> String {
    match configured_id {
        Some(id) if !id.trim().is_empty() => {
            debug!("Using configured terminal id {}", id);
            id.to_string()
        }
        _ => {
            let id = fingerprint_id(&host_key());
            debug!("Derived terminal id {} from host fingerprint", id);
            id
        }
    }
}

/// `mdmt2_` followed by the first six hex digits of the key's md5 digest
///
/// Ids derived on the same host stay identical to those of earlier installs.
pub fn fingerprint_id(host_key: &str) -> String {
    let digest = hex::encode(Md5::digest(host_key.as_bytes()));
    format!("{}{}", ID_PREFIX, &digest[..FINGERPRINT_LEN])
}

/// Stable host key: first hardware address as a decimal integer, then the machine id
fn host_key() -> String {
    if let Some(node) = hardware_node(Path::new(NET_CLASS_DIR)) {
        return node.to_string();
    }
    match fs::read_to_string(MACHINE_ID_FILE) {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            warn!("No stable host identifier found, terminal id will be shared with other hosts");
            FALLBACK_HOST_KEY.to_string()
        }
    }
}

/// Lowest-named interface with a non-zero hardware address, read as a 48-bit integer
fn hardware_node(net_dir: &Path) -> Option<u64> {
    let mut interfaces: Vec<_> = fs::read_dir(net_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != "lo")
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces.iter().find_map(|path| {
        let address = fs::read_to_string(path.join("address")).ok()?;
        parse_mac(address.trim()).filter(|node| *node != 0)
    })
}

fn parse_mac(address: &str) -> Option<u64> {
    let octets: Vec<&str> = address.split(':').collect();
    if octets.len() != 6 {
        return None;
    }
    octets.iter().try_fold(0u64, |node, octet| {
        u8::from_str_radix(octet, 16)
            .ok()
            .map(|byte| (node << 8) | u64::from(byte))
    })
}
