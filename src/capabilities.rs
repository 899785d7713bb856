//! Capability registry
//!
//! A fixed 512-slot bitmap advertised per managed system, one byte per
//! feature flag. Clients query it once before invoking optional operations;
//! the dispatcher stays the final authority and may still answer
//! `NoSupport`. Wire form is the hex string of the whole bitmap.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of capability slots
pub const CAP_COUNT: usize = 512;

/// Indices below this are reserved
pub const CAP_FIRST: u32 = 20;

/// One feature flag per optional operation.
///
/// Values are stable wire indices; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Capability {
    Volumes = 20,
    VolumeCreate = 21,
    VolumeResize = 22,
    VolumeReplicate = 23,
    VolumeReplicateClone = 24,
    VolumeReplicateCopy = 25,
    VolumeReplicateMirrorAsync = 26,
    VolumeReplicateMirrorSync = 27,
    VolumeCopyRangeBlockSize = 28,
    VolumeCopyRange = 29,
    VolumeCopyRangeClone = 30,
    VolumeCopyRangeCopy = 31,
    VolumeDelete = 33,
    VolumeEnable = 34,
    VolumeDisable = 35,
    VolumeMask = 36,
    VolumeUnmask = 37,
    AccessGroups = 38,
    AccessGroupCreateWwpn = 39,
    AccessGroupDelete = 40,
    AccessGroupInitiatorAddWwpn = 41,
    AccessGroupInitiatorDelete = 42,
    VolumesAccessibleByAccessGroup = 43,
    AccessGroupsGrantedToVolume = 44,
    VolumeChildDependency = 45,
    VolumeChildDependencyRm = 46,
    AccessGroupCreateIscsiIqn = 47,
    AccessGroupInitiatorAddIscsiIqn = 48,
    Fs = 100,
    FsDelete = 101,
    FsResize = 102,
    FsCreate = 103,
    FsClone = 104,
    FileClone = 105,
    FsSnapshots = 106,
    FsSnapshotCreate = 107,
    FsSnapshotDelete = 109,
    FsSnapshotRestore = 110,
    FsSnapshotRestoreSpecificFiles = 111,
    FsChildDependency = 112,
    FsChildDependencyRm = 113,
    FsChildDependencyRmSpecificFiles = 114,
    ExportAuth = 120,
    Exports = 121,
    ExportFs = 122,
    ExportRemove = 123,
    ExportCustomPath = 124,
    Pools = 130,
    SysReadCachePctUpdate = 158,
    SysReadCachePctGet = 159,
    SysFwVersionGet = 160,
    SysModeGet = 161,
    Disks = 170,
    TargetPorts = 216,
    Batteries = 220,
}

/// Slot value meaning "the backend supports this"
pub const SUPPORTED: u8 = 1;
/// Slot value meaning "the backend does not support this"
pub const UNSUPPORTED: u8 = 0;

/// Per-system capability bitmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CapabilitiesWire", into = "CapabilitiesWire")]
pub struct Capabilities {
    caps: Vec<u8>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl Capabilities {
    /// Empty bitmap, everything unsupported.
    pub fn new() -> Self {
        Self {
            caps: vec![UNSUPPORTED; CAP_COUNT],
        }
    }

    /// Query one capability. Out-of-range indices are simply unsupported.
    pub fn supported(&self, cap: Capability) -> bool {
        self.get(cap as u32) == SUPPORTED
    }

    /// Raw slot access by index; out-of-range returns UNSUPPORTED.
    pub fn get(&self, index: u32) -> u8 {
        self.caps.get(index as usize).copied().unwrap_or(UNSUPPORTED)
    }

    /// Mark one capability supported.
    pub fn set(&mut self, cap: Capability) {
        self.caps[cap as u32 as usize] = SUPPORTED;
    }

    /// Mark a batch of capabilities supported.
    pub fn set_n(&mut self, caps: &[Capability]) {
        for c in caps {
            self.set(*c);
        }
    }

    /// Mark every meaningful slot supported. Simulator and test use.
    pub fn enable_all(&mut self) {
        for slot in self.caps.iter_mut().skip(CAP_FIRST as usize) {
            *slot = SUPPORTED;
        }
    }

    /// Hex string of the whole bitmap, the wire representation.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.caps)
    }

    /// Rebuild from the hex wire form.
    pub fn from_hex(s: &str) -> Result<Self> {
        let caps = hex::decode(s).map_err(|e| {
            Error::TransportSerialization(format!("Invalid capability hex string: {e}"))
        })?;
        if caps.len() < CAP_COUNT {
            return Err(Error::TransportSerialization(format!(
                "Capability bitmap too short: {} slots",
                caps.len()
            )));
        }
        Ok(Self { caps })
    }
}

// Wire envelope: {"class": "Capabilities", "cap": "<hex>"}. The class tag
// itself is applied by the enclosing WireObject enum.
#[derive(Serialize, Deserialize)]
struct CapabilitiesWire {
    cap: String,
}

impl TryFrom<CapabilitiesWire> for Capabilities {
    type Error = Error;

    fn try_from(w: CapabilitiesWire) -> Result<Self> {
        Capabilities::from_hex(&w.cap)
    }
}

impl From<Capabilities> for CapabilitiesWire {
    fn from(c: Capabilities) -> Self {
        CapabilitiesWire { cap: c.to_hex() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_unsupported() {
        let c = Capabilities::new();
        assert!(!c.supported(Capability::VolumeCreate));
        assert_eq!(c.get(0), UNSUPPORTED);
    }

    #[test]
    fn test_set_and_get() {
        let mut c = Capabilities::new();
        c.set(Capability::VolumeCreate);
        assert!(c.supported(Capability::VolumeCreate));
        assert!(!c.supported(Capability::VolumeDelete));

        c.set_n(&[Capability::Fs, Capability::FsCreate]);
        assert!(c.supported(Capability::Fs));
        assert!(c.supported(Capability::FsCreate));
    }

    #[test]
    fn test_out_of_range_is_unsupported_not_error() {
        let c = Capabilities::new();
        assert_eq!(c.get(10_000), UNSUPPORTED);
    }

    #[test]
    fn test_enable_all_skips_reserved() {
        let mut c = Capabilities::new();
        c.enable_all();
        assert!(c.supported(Capability::Volumes));
        assert!(c.supported(Capability::Batteries));
        assert_eq!(c.get(CAP_FIRST - 1), UNSUPPORTED);
    }

    #[test]
    fn test_hex_round_trip() {
        let mut c = Capabilities::new();
        c.set_n(&[Capability::VolumeCreate, Capability::ExportFs]);
        let hx = c.to_hex();
        assert_eq!(hx.len(), CAP_COUNT * 2);
        let back = Capabilities::from_hex(&hx).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_from_hex_rejects_short_bitmap() {
        assert!(Capabilities::from_hex("0001").is_err());
        assert!(Capabilities::from_hex("zz").is_err());
    }
}
