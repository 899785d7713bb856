//! Domain entities and the wire envelope codec
//!
//! Every entity that crosses the plugin boundary serializes to a
//! self-describing envelope `{"class": "<TypeName>", <field>: <value>, ...}`.
//! The envelope is a closed tagged union ([`WireObject`]); decoding an
//! unknown `class` is a hard deserialization fault, never a silent drop.
//! Entities are immutable value records once constructed: plugins are the
//! sole authors, clients read-only consumers. Field validation runs at
//! construction (see [`validate`]), so a bad envelope is rejected the moment
//! the entity is built.

pub mod validate;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};

// =============================================================================
// Wire Integer Enums
// =============================================================================

/// Defines an enum carried on the wire as a plain integer, with a fallback
/// variant for values this revision does not know.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $val:expr,)+ } fallback = $fb:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub fn to_wire(self) -> i32 {
                match self { $(Self::$variant => $val,)+ }
            }

            pub fn from_wire(v: i32) -> Self {
                match v {
                    $($val => Self::$variant,)+
                    _ => Self::$fb,
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_i32(self.to_wire())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                Ok(Self::from_wire(i32::deserialize(d)?))
            }
        }
    };
}

wire_enum! {
    /// Operating mode of a managed system
    SystemMode {
        /// Plugin failed to query the mode
        Unknown = -2,
        /// Plugin cannot report a mode
        NoSupport = -1,
        /// Hardware RAID card hiding physical disks behind virtual ones
        HardwareRaid = 0,
        /// Plain HBA exposing physical disks directly
        Hba = 1,
    }
    fallback = Unknown
}

wire_enum! {
    /// Volume provisioning requested at creation
    VolumeProvisionType {
        Unknown = -1,
        Thin = 1,
        Full = 2,
        Default = 3,
    }
    fallback = Unknown
}

wire_enum! {
    /// Volume replication flavor
    VolumeReplicateType {
        Unknown = -1,
        /// Space-efficient writable point-in-time copy
        Clone = 2,
        /// Full bitwise copy
        Copy = 3,
        /// Blocking mirror, no data difference between sites
        MirrorSync = 4,
        /// Interval mirror, small data difference between sites
        MirrorAsync = 5,
    }
    fallback = Unknown
}

wire_enum! {
    /// Access group initiator addressing
    InitiatorType {
        Unknown = 0,
        Other = 1,
        Wwpn = 2,
        IscsiIqn = 5,
        IscsiWwpnMixed = 7,
    }
    fallback = Unknown
}

wire_enum! {
    /// Target port transport
    PortType {
        Other = 1,
        Fc = 2,
        Fcoe = 3,
        Iscsi = 4,
    }
    fallback = Other
}

wire_enum! {
    /// Physical disk media/interface
    DiskType {
        Unknown = 0,
        Other = 1,
        Ata = 3,
        Sata = 4,
        Sas = 5,
        Fc = 6,
        Sop = 7,
        Scsi = 8,
        Lun = 9,
        NlSas = 51,
        Hdd = 52,
        Ssd = 53,
        Hybrid = 54,
    }
    fallback = Unknown
}

wire_enum! {
    /// Disk physical link
    DiskLinkType {
        NoSupport = -2,
        Unknown = -1,
        Fc = 0,
        Ssa = 2,
        Sbp = 3,
        Srp = 4,
        Iscsi = 5,
        Sas = 6,
        Adt = 7,
        Ata = 8,
        Usb = 9,
        Sop = 10,
        PciE = 11,
    }
    fallback = Unknown
}

wire_enum! {
    /// Battery chemistry
    BatteryType {
        Unknown = 1,
        Other = 2,
        Chemical = 3,
        Capacitor = 4,
    }
    fallback = Unknown
}

wire_enum! {
    /// Long-running job state
    JobState {
        InProgress = 1,
        Complete = 2,
        Error = 3,
    }
    fallback = Error
}

// =============================================================================
// System
// =============================================================================

/// A managed storage system: SAN/NAS controller, RAID HBA or software target.
/// Root of ownership for pools, volumes and disks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: String,
    pub name: String,
    /// Status bitmap, see the `STATUS_*` constants
    pub status: u32,
    pub status_info: String,
    /// Firmware version; empty when the plugin cannot report one
    #[serde(default)]
    pub fw_version: String,
    /// Percentage of cache used for reads; negative sentinels below
    #[serde(default = "System::read_cache_pct_unreported")]
    pub read_cache_pct: i8,
    #[serde(default = "SystemMode::unreported")]
    pub mode: SystemMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

impl SystemMode {
    fn unreported() -> Self {
        SystemMode::NoSupport
    }
}

impl System {
    pub const STATUS_UNKNOWN: u32 = 1;
    pub const STATUS_OK: u32 = 1 << 1;
    pub const STATUS_ERROR: u32 = 1 << 2;
    pub const STATUS_DEGRADED: u32 = 1 << 3;
    pub const STATUS_PREDICTIVE_FAILURE: u32 = 1 << 4;
    pub const STATUS_OTHER: u32 = 1 << 5;

    /// Plugin does not support reporting read cache percentage
    pub const READ_CACHE_PCT_NO_SUPPORT: i8 = -2;
    /// Plugin failed to query read cache percentage
    pub const READ_CACHE_PCT_UNKNOWN: i8 = -1;

    fn read_cache_pct_unreported() -> i8 {
        Self::READ_CACHE_PCT_NO_SUPPORT
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A storage pool: the unit volumes and file systems are carved from.
/// Free space is derived by the backend, never written by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    /// What this pool can create, see `ELEMENT_TYPE_*`
    pub element_type: u64,
    /// Actions this pool cannot perform, see `UNSUPPORTED_*`
    #[serde(default)]
    pub unsupported_actions: u64,
    pub total_space: u64,
    pub free_space: u64,
    pub status: u64,
    #[serde(default)]
    pub status_info: String,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

impl Pool {
    pub const ELEMENT_TYPE_POOL: u64 = 1 << 1;
    pub const ELEMENT_TYPE_VOLUME: u64 = 1 << 2;
    pub const ELEMENT_TYPE_FS: u64 = 1 << 3;
    pub const ELEMENT_TYPE_DELTA: u64 = 1 << 4;
    pub const ELEMENT_TYPE_VOLUME_FULL: u64 = 1 << 5;
    pub const ELEMENT_TYPE_VOLUME_THIN: u64 = 1 << 6;
    pub const ELEMENT_TYPE_SYS_RESERVED: u64 = 1 << 10;

    pub const UNSUPPORTED_VOLUME_GROW: u64 = 1 << 0;
    pub const UNSUPPORTED_VOLUME_SHRINK: u64 = 1 << 1;

    pub const STATUS_UNKNOWN: u64 = 1;
    pub const STATUS_OK: u64 = 1 << 1;
    pub const STATUS_OTHER: u64 = 1 << 2;
    pub const STATUS_DEGRADED: u64 = 1 << 4;
    pub const STATUS_ERROR: u64 = 1 << 5;
    pub const STATUS_STOPPED: u64 = 1 << 9;
    pub const STATUS_RECONSTRUCTING: u64 = 1 << 12;
    pub const STATUS_VERIFYING: u64 = 1 << 13;
    pub const STATUS_INITIALIZING: u64 = 1 << 14;
    pub const STATUS_GROWING: u64 = 1 << 15;
}

// =============================================================================
// Volume
// =============================================================================

/// A block volume (LUN). `vpd83` is validated at construction; decoding a
/// volume with a malformed identifier fails immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VolumeWire", into = "VolumeWire")]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// SCSI VPD page 0x83 NAA identifier; empty when unreported
    pub vpd83: String,
    pub block_size: u64,
    pub num_of_blocks: u64,
    /// I/O access enabled by the administrator
    pub enabled: bool,
    pub system_id: String,
    pub pool_id: String,
    pub plugin_data: Option<String>,
}

impl Volume {
    pub const ADMIN_STATE_DISABLED: i32 = 0;
    pub const ADMIN_STATE_ENABLED: i32 = 1;

    /// Build a volume, validating the vpd83 identifier.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        vpd83: impl Into<String>,
        block_size: u64,
        num_of_blocks: u64,
        enabled: bool,
        system_id: impl Into<String>,
        pool_id: impl Into<String>,
    ) -> Result<Self> {
        let vpd83 = vpd83.into();
        if !validate::vpd83_valid(&vpd83) {
            return Err(Error::InvalidArgument(format!(
                "Incorrect format of VPD 0x83 NAA(3) string: '{vpd83}'"
            )));
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            vpd83,
            block_size,
            num_of_blocks,
            enabled,
            system_id: system_id.into(),
            pool_id: pool_id.into(),
            plugin_data: None,
        })
    }

    /// Usable size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.block_size * self.num_of_blocks
    }
}

#[derive(Serialize, Deserialize)]
struct VolumeWire {
    id: String,
    name: String,
    #[serde(default)]
    vpd83: String,
    block_size: u64,
    num_of_blocks: u64,
    admin_state: i32,
    system_id: String,
    pool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin_data: Option<String>,
}

impl TryFrom<VolumeWire> for Volume {
    type Error = Error;

    fn try_from(w: VolumeWire) -> Result<Self> {
        let mut v = Volume::new(
            w.id,
            w.name,
            w.vpd83,
            w.block_size,
            w.num_of_blocks,
            w.admin_state == Volume::ADMIN_STATE_ENABLED,
            w.system_id,
            w.pool_id,
        )?;
        v.plugin_data = w.plugin_data;
        Ok(v)
    }
}

impl From<Volume> for VolumeWire {
    fn from(v: Volume) -> Self {
        VolumeWire {
            id: v.id,
            name: v.name,
            vpd83: v.vpd83,
            block_size: v.block_size,
            num_of_blocks: v.num_of_blocks,
            admin_state: if v.enabled {
                Volume::ADMIN_STATE_ENABLED
            } else {
                Volume::ADMIN_STATE_DISABLED
            },
            system_id: v.system_id,
            pool_id: v.pool_id,
            plugin_data: v.plugin_data,
        }
    }
}

// =============================================================================
// Disk
// =============================================================================

/// A physical disk behind a managed system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub disk_type: DiskType,
    pub block_size: u64,
    pub num_of_blocks: u64,
    /// Status bitmap, see `STATUS_*`
    pub status: u64,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Rotations per minute; 0 for SSD, negative sentinels as in `RPM_*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<DiskLinkType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpd83: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

impl Disk {
    pub const STATUS_UNKNOWN: u64 = 1;
    pub const STATUS_OK: u64 = 1 << 1;
    pub const STATUS_OTHER: u64 = 1 << 2;
    pub const STATUS_PREDICTIVE_FAILURE: u64 = 1 << 3;
    pub const STATUS_ERROR: u64 = 1 << 4;
    pub const STATUS_REMOVED: u64 = 1 << 5;
    pub const STATUS_STARTING: u64 = 1 << 6;
    pub const STATUS_STOPPING: u64 = 1 << 7;
    pub const STATUS_STOPPED: u64 = 1 << 8;
    pub const STATUS_INITIALIZING: u64 = 1 << 9;
    pub const STATUS_MAINTENANCE_MODE: u64 = 1 << 10;
    pub const STATUS_SPARE_DISK: u64 = 1 << 11;
    pub const STATUS_RECONSTRUCT: u64 = 1 << 12;
    pub const STATUS_FREE: u64 = 1 << 13;

    pub const RPM_NO_SUPPORT: i32 = -2;
    pub const RPM_UNKNOWN: i32 = -1;

    pub fn size_bytes(&self) -> u64 {
        self.block_size * self.num_of_blocks
    }
}

// =============================================================================
// File System
// =============================================================================

/// A network-attached file system carved from a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystem {
    pub id: String,
    pub name: String,
    pub total_space: u64,
    pub free_space: u64,
    pub pool_id: String,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

/// A point-in-time snapshot of a file system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsSnapshot {
    pub id: String,
    pub name: String,
    /// Creation time, epoch seconds
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

// =============================================================================
// NFS Export
// =============================================================================

/// An NFS export of a file system. `fs_id` and `export_path` are mandatory
/// at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NfsExportWire", into = "NfsExportWire")]
pub struct NfsExport {
    pub id: String,
    pub fs_id: String,
    pub export_path: String,
    /// Authentication type, e.g. `"standard"`, `"krb5"`
    pub auth: String,
    /// Hosts with no_root_squash
    pub root: Vec<String>,
    /// Hosts with read/write access
    pub rw: Vec<String>,
    /// Hosts with read-only access
    pub ro: Vec<String>,
    /// UID mapped for anonymous access, `ANON_UID_GID_NA` when unused
    pub anonuid: i64,
    /// GID mapped for anonymous access, `ANON_UID_GID_NA` when unused
    pub anongid: i64,
    pub options: String,
    pub plugin_data: Option<String>,
}

impl NfsExport {
    pub const ANON_UID_GID_NA: i64 = -1;
    pub const ANON_UID_GID_ERROR: i64 = -2;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        fs_id: impl Into<String>,
        export_path: impl Into<String>,
        auth: impl Into<String>,
        root: Vec<String>,
        rw: Vec<String>,
        ro: Vec<String>,
        anonuid: i64,
        anongid: i64,
        options: impl Into<String>,
    ) -> Result<Self> {
        let fs_id = fs_id.into();
        let export_path = export_path.into();
        if fs_id.is_empty() {
            return Err(Error::InvalidArgument("NFS export requires fs_id".into()));
        }
        if export_path.is_empty() {
            return Err(Error::InvalidArgument(
                "NFS export requires export_path".into(),
            ));
        }
        Ok(Self {
            id: id.into(),
            fs_id,
            export_path,
            auth: auth.into(),
            root,
            rw,
            ro,
            anonuid,
            anongid,
            options: options.into(),
            plugin_data: None,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct NfsExportWire {
    id: String,
    fs_id: String,
    export_path: String,
    #[serde(default)]
    auth: String,
    #[serde(default)]
    root: Vec<String>,
    #[serde(default)]
    rw: Vec<String>,
    #[serde(default)]
    ro: Vec<String>,
    #[serde(default = "anon_na")]
    anonuid: i64,
    #[serde(default = "anon_na")]
    anongid: i64,
    #[serde(default)]
    options: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin_data: Option<String>,
}

fn anon_na() -> i64 {
    NfsExport::ANON_UID_GID_NA
}

impl TryFrom<NfsExportWire> for NfsExport {
    type Error = Error;

    fn try_from(w: NfsExportWire) -> Result<Self> {
        let mut e = NfsExport::new(
            w.id, w.fs_id, w.export_path, w.auth, w.root, w.rw, w.ro, w.anonuid, w.anongid,
            w.options,
        )?;
        e.plugin_data = w.plugin_data;
        Ok(e)
    }
}

impl From<NfsExport> for NfsExportWire {
    fn from(e: NfsExport) -> Self {
        NfsExportWire {
            id: e.id,
            fs_id: e.fs_id,
            export_path: e.export_path,
            auth: e.auth,
            root: e.root,
            rw: e.rw,
            ro: e.ro,
            anonuid: e.anonuid,
            anongid: e.anongid,
            options: e.options,
            plugin_data: e.plugin_data,
        }
    }
}

// =============================================================================
// Access Group
// =============================================================================

/// A set of initiators volumes are masked to. Initiator ids are validated
/// and normalized element-by-element at construction; the list preserves
/// order and holds no duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AccessGroupWire", into = "AccessGroupWire")]
pub struct AccessGroup {
    pub id: String,
    pub name: String,
    pub init_ids: Vec<String>,
    pub init_type: InitiatorType,
    pub system_id: String,
    pub plugin_data: Option<String>,
}

impl AccessGroup {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        init_ids: Vec<String>,
        init_type: InitiatorType,
        system_id: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: name.into(),
            init_ids: validate::standardize_init_ids(&init_ids)?,
            init_type,
            system_id: system_id.into(),
            plugin_data: None,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct AccessGroupWire {
    id: String,
    name: String,
    init_ids: Vec<String>,
    init_type: InitiatorType,
    system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin_data: Option<String>,
}

impl TryFrom<AccessGroupWire> for AccessGroup {
    type Error = Error;

    fn try_from(w: AccessGroupWire) -> Result<Self> {
        let mut ag = AccessGroup::new(w.id, w.name, w.init_ids, w.init_type, w.system_id)?;
        ag.plugin_data = w.plugin_data;
        Ok(ag)
    }
}

impl From<AccessGroup> for AccessGroupWire {
    fn from(ag: AccessGroup) -> Self {
        AccessGroupWire {
            id: ag.id,
            name: ag.name,
            init_ids: ag.init_ids,
            init_type: ag.init_type,
            system_id: ag.system_id,
            plugin_data: ag.plugin_data,
        }
    }
}

// =============================================================================
// Target Port
// =============================================================================

/// A front-end port of a managed system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPort {
    pub id: String,
    pub port_type: PortType,
    /// Upper-layer address: WWPN for FC/FCoE, IQN for iSCSI
    pub service_address: String,
    /// Network-layer address: WWPN or ip:port
    pub network_address: String,
    /// Physical-layer address: WWPN or MAC
    pub physical_address: String,
    /// Name an administrator can use to locate the port
    pub physical_name: String,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

// =============================================================================
// Battery
// =============================================================================

/// A cache-protection battery or capacitor on a managed system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub id: String,
    pub name: String,
    pub battery_type: BatteryType,
    /// Status bitmap, see `STATUS_*`
    pub status: u64,
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_data: Option<String>,
}

impl Battery {
    pub const STATUS_UNKNOWN: u64 = 1;
    pub const STATUS_OTHER: u64 = 1 << 1;
    pub const STATUS_OK: u64 = 1 << 2;
    pub const STATUS_DISCHARGING: u64 = 1 << 3;
    pub const STATUS_CHARGING: u64 = 1 << 4;
    pub const STATUS_LEARNING: u64 = 1 << 5;
    pub const STATUS_DEGRADED: u64 = 1 << 6;
    pub const STATUS_ERROR: u64 = 1 << 7;
}

// =============================================================================
// Block Range
// =============================================================================

/// One extent of a sub-volume copy; always travels in a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub src_block: u64,
    pub dest_block: u64,
    pub block_count: u64,
}

// =============================================================================
// Wire Envelope
// =============================================================================

/// The closed set of entity envelopes that may appear on the wire.
///
/// Serialized form is `{"class": "<VariantName>", ...fields}`. Decoding is
/// an exhaustive match over the discriminant; an unknown `class` value is a
/// deserialization error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum WireObject {
    System(System),
    Pool(Pool),
    Volume(Volume),
    Disk(Disk),
    FileSystem(FileSystem),
    FsSnapshot(FsSnapshot),
    NfsExport(NfsExport),
    AccessGroup(AccessGroup),
    TargetPort(TargetPort),
    Battery(Battery),
    BlockRange(BlockRange),
    Capabilities(Capabilities),
}

/// Encode any serializable value into its wire JSON form.
pub fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Decode a wire JSON value, rejecting malformed or unknown envelopes.
pub fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

// =============================================================================
// Job-Bearing Results
// =============================================================================

/// Result of a create/resize/replicate-style operation: either the value,
/// or a job handle to poll. Exactly one, never both, never neither.
///
/// Wire form is the two-element array `[job_id, value]` with exactly one
/// element non-null; the invariant is enforced on decode.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncResult<T> {
    Completed(T),
    Pending(String),
}

impl<T> AsyncResult<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, AsyncResult::Pending(_))
    }
}

impl<T: Serialize> Serialize for AsyncResult<T> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AsyncResult::Pending(job) => (Some(job), None::<&T>).serialize(s),
            AsyncResult::Completed(v) => (None::<&str>, Some(v)).serialize(s),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for AsyncResult<T> {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        let (job, value): (Option<String>, Option<T>) = Deserialize::deserialize(d)?;
        match (job, value) {
            (Some(job), None) => Ok(AsyncResult::Pending(job)),
            (None, Some(v)) => Ok(AsyncResult::Completed(v)),
            (Some(_), Some(_)) => Err(D::Error::custom(
                "job-bearing result has both a job id and a value",
            )),
            (None, None) => Err(D::Error::custom(
                "job-bearing result has neither a job id nor a value",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample_volume() -> Volume {
        Volume::new(
            "VOL_1",
            "db-lun-0",
            format!("6{}", "0".repeat(31)),
            512,
            1 << 21,
            true,
            "sim-01",
            "POOL_1",
        )
        .unwrap()
    }

    #[test]
    fn test_envelope_carries_class_tag() {
        let v = serde_json::to_value(WireObject::Volume(sample_volume())).unwrap();
        assert_eq!(v["class"], "Volume");
        assert_eq!(v["id"], "VOL_1");
        assert_eq!(v["admin_state"], Volume::ADMIN_STATE_ENABLED);
    }

    #[test]
    fn test_entity_round_trips() {
        let objs = vec![
            WireObject::Volume(sample_volume()),
            WireObject::System(System {
                id: "sim-01".into(),
                name: "simulator".into(),
                status: System::STATUS_OK,
                status_info: String::new(),
                fw_version: "1.0".into(),
                read_cache_pct: 50,
                mode: SystemMode::HardwareRaid,
                plugin_data: None,
            }),
            WireObject::Pool(Pool {
                id: "POOL_1".into(),
                name: "pool-a".into(),
                element_type: Pool::ELEMENT_TYPE_VOLUME | Pool::ELEMENT_TYPE_FS,
                unsupported_actions: 0,
                total_space: 1 << 40,
                free_space: 1 << 39,
                status: Pool::STATUS_OK,
                status_info: String::new(),
                system_id: "sim-01".into(),
                plugin_data: None,
            }),
            WireObject::FsSnapshot(FsSnapshot {
                id: "SNAP_1".into(),
                name: "nightly".into(),
                ts: 1_700_000_000,
                plugin_data: None,
            }),
            WireObject::BlockRange(BlockRange {
                src_block: 0,
                dest_block: 100,
                block_count: 50,
            }),
        ];
        for obj in objs {
            let wire = serde_json::to_value(&obj).unwrap();
            let back: WireObject = serde_json::from_value(wire).unwrap();
            assert_eq!(back, obj);
        }
    }

    #[test]
    fn test_unknown_class_is_a_fault() {
        let wire = serde_json::json!({"class": "NoSuchType", "id": "x"});
        let got: Result<WireObject> = decode(wire);
        assert_matches!(got, Err(Error::TransportSerialization(_)));
    }

    #[test]
    fn test_volume_rejects_bad_vpd83_on_decode() {
        let wire = serde_json::json!({
            "class": "Volume",
            "id": "V", "name": "v", "vpd83": "60a98000abc",
            "block_size": 512, "num_of_blocks": 100,
            "admin_state": 1, "system_id": "s", "pool_id": "p",
        });
        let got: std::result::Result<WireObject, _> = serde_json::from_value(wire);
        assert!(got.is_err());
    }

    #[test]
    fn test_access_group_normalizes_on_decode() {
        let wire = serde_json::json!({
            "class": "AccessGroup",
            "id": "AG_1", "name": "hosts",
            "init_ids": ["0x10000000C9952FDE", "10-00-00-00-c9-95-2f-de"],
            "init_type": 2, "system_id": "sim-01",
        });
        let got: WireObject = serde_json::from_value(wire).unwrap();
        let WireObject::AccessGroup(ag) = got else {
            panic!("wrong envelope");
        };
        assert_eq!(ag.init_ids, vec!["10:00:00:00:c9:95:2f:de".to_string()]);
        assert_eq!(ag.init_type, InitiatorType::Wwpn);
    }

    #[test]
    fn test_nested_envelopes_decode_recursively() {
        let wire = serde_json::json!([
            {"class": "BlockRange", "src_block": 0, "dest_block": 8, "block_count": 4},
            {"class": "BlockRange", "src_block": 16, "dest_block": 32, "block_count": 8},
        ]);
        let ranges: Vec<WireObject> = serde_json::from_value(wire).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_matches!(ranges[0], WireObject::BlockRange(_));
    }

    #[test]
    fn test_async_result_exactly_one_arm() {
        let pending: AsyncResult<Volume> =
            serde_json::from_value(serde_json::json!(["JOB_3", null])).unwrap();
        assert_matches!(pending, AsyncResult::Pending(ref id) if id == "JOB_3");

        let vol_wire = serde_json::to_value(sample_volume()).unwrap();
        let done: AsyncResult<Volume> =
            serde_json::from_value(serde_json::json!([null, vol_wire])).unwrap();
        assert_matches!(done, AsyncResult::Completed(_));

        let both: std::result::Result<AsyncResult<Volume>, _> = serde_json::from_value(
            serde_json::json!(["JOB_3", serde_json::to_value(sample_volume()).unwrap()]),
        );
        assert!(both.is_err());

        let neither: std::result::Result<AsyncResult<Volume>, _> =
            serde_json::from_value(serde_json::json!([null, null]));
        assert!(neither.is_err());
    }

    #[test]
    fn test_nfs_export_requires_fs_id_and_path() {
        assert_matches!(
            NfsExport::new("E", "", "/mnt/x", "standard", vec![], vec![], vec![], -1, -1, ""),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            NfsExport::new("E", "FS_1", "", "standard", vec![], vec![], vec![], -1, -1, ""),
            Err(Error::InvalidArgument(_))
        );
    }

    #[test]
    fn test_wire_enum_fallback() {
        assert_eq!(DiskType::from_wire(9999), DiskType::Unknown);
        assert_eq!(SystemMode::from_wire(1), SystemMode::Hba);
        assert_eq!(JobState::from_wire(2), JobState::Complete);
    }

    #[test]
    fn test_volume_size_bytes() {
        let v = sample_volume();
        assert_eq!(v.size_bytes(), 512 * (1 << 21));
    }
}
