//! Plugin-side contract
//!
//! A plugin fronts one storage backend behind a unix socket. The interface
//! splits into a mandatory base (lifecycle, jobs, capabilities, inventory)
//! and two optional groups: block (SAN) and file (NAS) operations. Every
//! optional operation defaults to `NoSupport`, so a backend only overrides
//! what it actually implements and nothing ever fails silently or crashes —
//! the capability bitmap is advertisement, the dispatcher is the authority.

pub mod runner;

pub use runner::{Method, PluginRunner};

use async_trait::async_trait;

use crate::capabilities::Capabilities;
use crate::data::{
    AccessGroup, AsyncResult, Battery, BlockRange, Disk, FileSystem, FsSnapshot, InitiatorType,
    JobState, NfsExport, Pool, System, TargetPort, Volume, VolumeProvisionType,
    VolumeReplicateType, WireObject,
};
use crate::error::{Error, Result};
use crate::uri::DeviceUri;

/// Identification a plugin reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub description: String,
    pub version: String,
}

/// Opaque job handle; the plugin decides its internal structure
pub type JobId = String;

/// Result of polling one job: state, percent complete, and the value once
/// the job reaches `Complete`
pub type JobPoll = (JobState, u8, Option<WireObject>);

// =============================================================================
// Base Interface
// =============================================================================

/// Operations every plugin must provide
#[async_trait]
pub trait PluginBase: Send + Sync {
    /// First call on every new connection; carries the device URI,
    /// credentials and the advisory downstream timeout.
    async fn plugin_register(
        &self,
        uri: &DeviceUri,
        password: Option<&str>,
        timeout_ms: u32,
    ) -> Result<()>;

    /// Graceful teardown; the dispatcher closes the connection afterwards.
    async fn plugin_unregister(&self) -> Result<()>;

    /// Advisory timeout for the plugin's own downstream calls, not for the
    /// client's wait on the plugin.
    async fn time_out_set(&self, ms: u32) -> Result<()>;

    async fn time_out_get(&self) -> Result<u32>;

    /// Poll a long-running job. Unknown ids fail `NotFoundJob`.
    async fn job_status(&self, job_id: &str) -> Result<JobPoll>;

    /// Release a job handle. Freeing twice or an unknown id fails
    /// `NotFoundJob`.
    async fn job_free(&self, job_id: &str) -> Result<()>;

    /// Feature bitmap for one managed system.
    async fn capabilities(&self, system: &System) -> Result<Capabilities>;

    async fn plugin_info(&self) -> Result<PluginInfo>;

    async fn pools(&self) -> Result<Vec<Pool>>;

    async fn systems(&self) -> Result<Vec<System>>;
}

fn no_support<T>(op: &str) -> Result<T> {
    Err(Error::NoSupport(format!("Operation '{op}' is not supported")))
}

// =============================================================================
// Storage-Area-Network Group
// =============================================================================

/// Block-storage operations; every method defaults to `NoSupport`
#[async_trait]
pub trait SanPlugin: PluginBase {
    async fn volumes(&self) -> Result<Vec<Volume>> {
        no_support("volumes")
    }

    async fn volume_create(
        &self,
        _pool: Pool,
        _volume_name: String,
        _size_bytes: u64,
        _provisioning: VolumeProvisionType,
    ) -> Result<AsyncResult<Volume>> {
        no_support("volume_create")
    }

    async fn volume_resize(
        &self,
        _volume: Volume,
        _new_size_bytes: u64,
    ) -> Result<AsyncResult<Volume>> {
        no_support("volume_resize")
    }

    async fn volume_replicate(
        &self,
        _pool: Option<Pool>,
        _rep_type: VolumeReplicateType,
        _volume_src: Volume,
        _name: String,
    ) -> Result<AsyncResult<Volume>> {
        no_support("volume_replicate")
    }

    /// Granularity for `volume_replicate_range` extents, in blocks.
    async fn volume_replicate_range_block_size(&self, _system: System) -> Result<u32> {
        no_support("volume_replicate_range_block_size")
    }

    async fn volume_replicate_range(
        &self,
        _rep_type: VolumeReplicateType,
        _volume_src: Volume,
        _volume_dest: Volume,
        _ranges: Vec<BlockRange>,
    ) -> Result<Option<JobId>> {
        no_support("volume_replicate_range")
    }

    async fn volume_delete(&self, _volume: Volume) -> Result<Option<JobId>> {
        no_support("volume_delete")
    }

    async fn volume_enable(&self, _volume: Volume) -> Result<()> {
        no_support("volume_enable")
    }

    async fn volume_disable(&self, _volume: Volume) -> Result<()> {
        no_support("volume_disable")
    }

    async fn volume_mask(&self, _access_group: AccessGroup, _volume: Volume) -> Result<()> {
        no_support("volume_mask")
    }

    async fn volume_unmask(&self, _access_group: AccessGroup, _volume: Volume) -> Result<()> {
        no_support("volume_unmask")
    }

    async fn access_groups(&self) -> Result<Vec<AccessGroup>> {
        no_support("access_groups")
    }

    async fn access_group_create(
        &self,
        _name: String,
        _init_id: String,
        _init_type: InitiatorType,
        _system: System,
    ) -> Result<AccessGroup> {
        no_support("access_group_create")
    }

    async fn access_group_delete(&self, _access_group: AccessGroup) -> Result<()> {
        no_support("access_group_delete")
    }

    async fn access_group_initiator_add(
        &self,
        _access_group: AccessGroup,
        _init_id: String,
        _init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        no_support("access_group_initiator_add")
    }

    async fn access_group_initiator_delete(
        &self,
        _access_group: AccessGroup,
        _init_id: String,
        _init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        no_support("access_group_initiator_delete")
    }

    async fn volumes_accessible_by_access_group(
        &self,
        _access_group: AccessGroup,
    ) -> Result<Vec<Volume>> {
        no_support("volumes_accessible_by_access_group")
    }

    async fn access_groups_granted_to_volume(&self, _volume: Volume) -> Result<Vec<AccessGroup>> {
        no_support("access_groups_granted_to_volume")
    }

    /// Whether the volume has a dependent child (replica) the backend
    /// would refuse to delete over.
    async fn volume_child_dependency(&self, _volume: Volume) -> Result<bool> {
        no_support("volume_child_dependency")
    }

    async fn volume_child_dependency_rm(&self, _volume: Volume) -> Result<Option<JobId>> {
        no_support("volume_child_dependency_rm")
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        no_support("disks")
    }

    async fn target_ports(&self) -> Result<Vec<TargetPort>> {
        no_support("target_ports")
    }

    async fn batteries(&self) -> Result<Vec<Battery>> {
        no_support("batteries")
    }
}

// =============================================================================
// Network-Attached-Storage Group
// =============================================================================

/// File-storage operations; every method defaults to `NoSupport`
#[async_trait]
pub trait NasPlugin: PluginBase {
    async fn fs(&self) -> Result<Vec<FileSystem>> {
        no_support("fs")
    }

    async fn fs_create(
        &self,
        _pool: Pool,
        _name: String,
        _size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        no_support("fs_create")
    }

    async fn fs_delete(&self, _fs: FileSystem) -> Result<Option<JobId>> {
        no_support("fs_delete")
    }

    async fn fs_resize(
        &self,
        _fs: FileSystem,
        _new_size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        no_support("fs_resize")
    }

    async fn fs_clone(
        &self,
        _src_fs: FileSystem,
        _dest_fs_name: String,
        _snapshot: Option<FsSnapshot>,
    ) -> Result<AsyncResult<FileSystem>> {
        no_support("fs_clone")
    }

    /// Clone a single file within a file system.
    async fn fs_file_clone(
        &self,
        _fs: FileSystem,
        _src_file_name: String,
        _dest_file_name: String,
        _snapshot: Option<FsSnapshot>,
    ) -> Result<Option<JobId>> {
        no_support("fs_file_clone")
    }

    async fn fs_snapshots(&self, _fs: FileSystem) -> Result<Vec<FsSnapshot>> {
        no_support("fs_snapshots")
    }

    async fn fs_snapshot_create(
        &self,
        _fs: FileSystem,
        _snapshot_name: String,
    ) -> Result<AsyncResult<FsSnapshot>> {
        no_support("fs_snapshot_create")
    }

    async fn fs_snapshot_delete(
        &self,
        _fs: FileSystem,
        _snapshot: FsSnapshot,
    ) -> Result<Option<JobId>> {
        no_support("fs_snapshot_delete")
    }

    async fn fs_snapshot_restore(
        &self,
        _fs: FileSystem,
        _snapshot: FsSnapshot,
        _files: Vec<String>,
        _restore_files: Vec<String>,
        _all_files: bool,
    ) -> Result<Option<JobId>> {
        no_support("fs_snapshot_restore")
    }

    async fn fs_child_dependency(&self, _fs: FileSystem, _files: Vec<String>) -> Result<bool> {
        no_support("fs_child_dependency")
    }

    async fn fs_child_dependency_rm(
        &self,
        _fs: FileSystem,
        _files: Vec<String>,
    ) -> Result<Option<JobId>> {
        no_support("fs_child_dependency_rm")
    }

    /// NFS authentication types the backend understands.
    async fn export_auth(&self) -> Result<Vec<String>> {
        no_support("export_auth")
    }

    async fn exports(&self) -> Result<Vec<NfsExport>> {
        no_support("exports")
    }

    #[allow(clippy::too_many_arguments)]
    async fn export_fs(
        &self,
        _fs_id: String,
        _export_path: Option<String>,
        _root_list: Vec<String>,
        _rw_list: Vec<String>,
        _ro_list: Vec<String>,
        _anon_uid: i64,
        _anon_gid: i64,
        _auth_type: Option<String>,
        _options: Option<String>,
    ) -> Result<NfsExport> {
        no_support("export_fs")
    }

    async fn export_remove(&self, _export: NfsExport) -> Result<()> {
        no_support("export_remove")
    }
}

/// The full dispatcher-facing surface: base plus both optional groups.
pub trait StoragePlugin: SanPlugin + NasPlugin {}

impl<T: SanPlugin + NasPlugin> StoragePlugin for T {}
