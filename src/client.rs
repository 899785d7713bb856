//! Typed client for talking to one plugin
//!
//! `Client::connect` resolves the URI scheme to a plugin socket, opens the
//! transport and performs the `startup` handshake; after that every method
//! here is a thin typed wrapper over one wire call. Long-running operations
//! surface as [`AsyncResult`]; `run_or_wait` bridges them back to plain
//! values by polling the job until it settles.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::capabilities::Capabilities;
use crate::data::{
    AccessGroup, AsyncResult, Battery, BlockRange, Disk, FileSystem, FsSnapshot, InitiatorType,
    JobState, NfsExport, Pool, System, TargetPort, Volume, VolumeProvisionType,
    VolumeReplicateType,
};
use crate::error::{Error, Result};
use crate::plugin::PluginInfo;
use crate::transport::Transport;
use crate::uri::{DeviceUri, IpcConfig};

/// Advisory downstream timeout handed to the plugin at startup.
pub const DEFAULT_TIMEOUT_MS: u32 = 30_000;

/// Pause between job polls in the waiting helpers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A registered session with one plugin
#[derive(Debug)]
pub struct Client {
    transport: Transport,
    uri: DeviceUri,
}

impl Client {
    /// Connect using the socket root from the environment.
    pub async fn connect(uri: &str, password: Option<&str>, timeout_ms: u32) -> Result<Self> {
        Self::connect_with(&IpcConfig::from_env(), uri, password, timeout_ms).await
    }

    /// Connect with an explicit IPC configuration.
    pub async fn connect_with(
        ipc: &IpcConfig,
        uri: &str,
        password: Option<&str>,
        timeout_ms: u32,
    ) -> Result<Self> {
        let parsed = DeviceUri::parse(uri)?;
        let socket = ipc.resolve(&parsed.scheme)?;
        debug!(scheme = %parsed.scheme, socket = %socket.display(), "connecting to plugin");
        let transport = Transport::connect(&socket).await?;
        Self::register(transport, parsed, password, timeout_ms).await
    }

    /// Perform the `startup` handshake over an already-open transport.
    pub(crate) async fn register(
        mut transport: Transport,
        uri: DeviceUri,
        password: Option<&str>,
        timeout_ms: u32,
    ) -> Result<Self> {
        transport
            .rpc(
                "startup",
                json!({
                    "uri": uri.raw,
                    "password": password,
                    "timeout_ms": timeout_ms,
                }),
            )
            .await?;
        Ok(Self { transport, uri })
    }

    /// The URI this session was opened with.
    pub fn uri(&self) -> &DeviceUri {
        &self.uri
    }

    async fn call<T: DeserializeOwned>(&mut self, method: &str, params: Value) -> Result<T> {
        let value = self.transport.rpc(method, params).await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    // ------------------------------------------------------------------
    // Lifecycle and base
    // ------------------------------------------------------------------

    /// Graceful shutdown; consumes the session.
    pub async fn close(mut self) -> Result<()> {
        let _: Value = self.call("shutdown", json!({})).await?;
        self.transport.close().await;
        Ok(())
    }

    pub async fn plugin_info(&mut self) -> Result<PluginInfo> {
        let (description, version): (String, String) = self.call("plugin_info", json!({})).await?;
        Ok(PluginInfo {
            description,
            version,
        })
    }

    pub async fn time_out_set(&mut self, ms: u32) -> Result<()> {
        self.call("time_out_set", json!({ "ms": ms })).await
    }

    pub async fn time_out_get(&mut self) -> Result<u32> {
        self.call("time_out_get", json!({})).await
    }

    /// Poll one job. `T` is the type the job yields once complete.
    pub async fn job_status<T: DeserializeOwned>(
        &mut self,
        job_id: &str,
    ) -> Result<(JobState, u8, Option<T>)> {
        self.call("job_status", json!({ "job_id": job_id })).await
    }

    pub async fn job_free(&mut self, job_id: &str) -> Result<()> {
        self.call("job_free", json!({ "job_id": job_id })).await
    }

    pub async fn capabilities(&mut self, system: &System) -> Result<Capabilities> {
        self.call("capabilities", json!({ "system": system })).await
    }

    pub async fn pools(&mut self) -> Result<Vec<Pool>> {
        self.call("pools", json!({})).await
    }

    pub async fn systems(&mut self) -> Result<Vec<System>> {
        self.call("systems", json!({})).await
    }

    // ------------------------------------------------------------------
    // Job waiting
    // ------------------------------------------------------------------

    /// Poll `job_id` until it completes, free it, and return its value.
    pub async fn job_wait<T: DeserializeOwned>(
        &mut self,
        job_id: &str,
        interval: Duration,
    ) -> Result<T> {
        loop {
            let (state, percent, item): (JobState, u8, Option<T>) =
                self.job_status(job_id).await?;
            match state {
                JobState::Complete => {
                    self.job_free(job_id).await?;
                    return item.ok_or_else(|| {
                        Error::PluginBug(format!("Job '{job_id}' completed without a value"))
                    });
                }
                JobState::InProgress => {
                    debug!(job_id, percent, "job in progress");
                    tokio::time::sleep(interval).await;
                }
                JobState::Error => {
                    // A failed job reports its fault through job_status
                    // itself; reaching here means the plugin broke that
                    // contract.
                    return Err(Error::PluginBug(format!(
                        "Job '{job_id}' is in the error state but job_status succeeded"
                    )));
                }
            }
        }
    }

    /// Like [`job_wait`](Self::job_wait) for jobs that yield no value.
    pub async fn job_wait_done(&mut self, job_id: &str, interval: Duration) -> Result<()> {
        loop {
            let (state, percent, _): (JobState, u8, Option<Value>) =
                self.job_status(job_id).await?;
            match state {
                JobState::Complete => return self.job_free(job_id).await,
                JobState::InProgress => {
                    debug!(job_id, percent, "job in progress");
                    tokio::time::sleep(interval).await;
                }
                JobState::Error => {
                    return Err(Error::PluginBug(format!(
                        "Job '{job_id}' is in the error state but job_status succeeded"
                    )));
                }
            }
        }
    }

    /// Collapse an [`AsyncResult`] into its value, polling if needed.
    pub async fn run_or_wait<T: DeserializeOwned>(
        &mut self,
        outcome: AsyncResult<T>,
        interval: Duration,
    ) -> Result<T> {
        match outcome {
            AsyncResult::Completed(value) => Ok(value),
            AsyncResult::Pending(job_id) => self.job_wait(&job_id, interval).await,
        }
    }

    /// Collapse an optional job id the way `run_or_wait` does for values.
    pub async fn finish_job(&mut self, job_id: Option<String>, interval: Duration) -> Result<()> {
        match job_id {
            Some(job_id) => self.job_wait_done(&job_id, interval).await,
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Block storage
    // ------------------------------------------------------------------

    pub async fn volumes(&mut self) -> Result<Vec<Volume>> {
        self.call("volumes", json!({})).await
    }

    pub async fn volume_create(
        &mut self,
        pool: &Pool,
        volume_name: &str,
        size_bytes: u64,
        provisioning: VolumeProvisionType,
    ) -> Result<AsyncResult<Volume>> {
        self.call(
            "volume_create",
            json!({
                "pool": pool,
                "volume_name": volume_name,
                "size_bytes": size_bytes,
                "provisioning": provisioning,
            }),
        )
        .await
    }

    pub async fn volume_resize(
        &mut self,
        volume: &Volume,
        new_size_bytes: u64,
    ) -> Result<AsyncResult<Volume>> {
        self.call(
            "volume_resize",
            json!({ "volume": volume, "new_size_bytes": new_size_bytes }),
        )
        .await
    }

    pub async fn volume_replicate(
        &mut self,
        pool: Option<&Pool>,
        rep_type: VolumeReplicateType,
        volume_src: &Volume,
        name: &str,
    ) -> Result<AsyncResult<Volume>> {
        self.call(
            "volume_replicate",
            json!({
                "pool": pool,
                "rep_type": rep_type,
                "volume_src": volume_src,
                "name": name,
            }),
        )
        .await
    }

    pub async fn volume_replicate_range_block_size(&mut self, system: &System) -> Result<u32> {
        self.call("volume_replicate_range_block_size", json!({ "system": system }))
            .await
    }

    pub async fn volume_replicate_range(
        &mut self,
        rep_type: VolumeReplicateType,
        volume_src: &Volume,
        volume_dest: &Volume,
        ranges: &[BlockRange],
    ) -> Result<Option<String>> {
        self.call(
            "volume_replicate_range",
            json!({
                "rep_type": rep_type,
                "volume_src": volume_src,
                "volume_dest": volume_dest,
                "ranges": ranges,
            }),
        )
        .await
    }

    pub async fn volume_delete(&mut self, volume: &Volume) -> Result<Option<String>> {
        self.call("volume_delete", json!({ "volume": volume })).await
    }

    pub async fn volume_enable(&mut self, volume: &Volume) -> Result<()> {
        self.call("volume_enable", json!({ "volume": volume })).await
    }

    pub async fn volume_disable(&mut self, volume: &Volume) -> Result<()> {
        self.call("volume_disable", json!({ "volume": volume })).await
    }

    pub async fn volume_mask(&mut self, access_group: &AccessGroup, volume: &Volume) -> Result<()> {
        self.call(
            "volume_mask",
            json!({ "access_group": access_group, "volume": volume }),
        )
        .await
    }

    pub async fn volume_unmask(
        &mut self,
        access_group: &AccessGroup,
        volume: &Volume,
    ) -> Result<()> {
        self.call(
            "volume_unmask",
            json!({ "access_group": access_group, "volume": volume }),
        )
        .await
    }

    pub async fn access_groups(&mut self) -> Result<Vec<AccessGroup>> {
        self.call("access_groups", json!({})).await
    }

    pub async fn access_group_create(
        &mut self,
        name: &str,
        init_id: &str,
        init_type: InitiatorType,
        system: &System,
    ) -> Result<AccessGroup> {
        self.call(
            "access_group_create",
            json!({
                "name": name,
                "init_id": init_id,
                "init_type": init_type,
                "system": system,
            }),
        )
        .await
    }

    pub async fn access_group_delete(&mut self, access_group: &AccessGroup) -> Result<()> {
        self.call("access_group_delete", json!({ "access_group": access_group }))
            .await
    }

    pub async fn access_group_initiator_add(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.call(
            "access_group_initiator_add",
            json!({
                "access_group": access_group,
                "init_id": init_id,
                "init_type": init_type,
            }),
        )
        .await
    }

    pub async fn access_group_initiator_delete(
        &mut self,
        access_group: &AccessGroup,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.call(
            "access_group_initiator_delete",
            json!({
                "access_group": access_group,
                "init_id": init_id,
                "init_type": init_type,
            }),
        )
        .await
    }

    pub async fn volumes_accessible_by_access_group(
        &mut self,
        access_group: &AccessGroup,
    ) -> Result<Vec<Volume>> {
        self.call(
            "volumes_accessible_by_access_group",
            json!({ "access_group": access_group }),
        )
        .await
    }

    pub async fn access_groups_granted_to_volume(
        &mut self,
        volume: &Volume,
    ) -> Result<Vec<AccessGroup>> {
        self.call("access_groups_granted_to_volume", json!({ "volume": volume }))
            .await
    }

    pub async fn volume_child_dependency(&mut self, volume: &Volume) -> Result<bool> {
        self.call("volume_child_dependency", json!({ "volume": volume }))
            .await
    }

    pub async fn volume_child_dependency_rm(&mut self, volume: &Volume) -> Result<Option<String>> {
        self.call("volume_child_dependency_rm", json!({ "volume": volume }))
            .await
    }

    pub async fn disks(&mut self) -> Result<Vec<Disk>> {
        self.call("disks", json!({})).await
    }

    pub async fn target_ports(&mut self) -> Result<Vec<TargetPort>> {
        self.call("target_ports", json!({})).await
    }

    pub async fn batteries(&mut self) -> Result<Vec<Battery>> {
        self.call("batteries", json!({})).await
    }

    // ------------------------------------------------------------------
    // File storage
    // ------------------------------------------------------------------

    pub async fn fs(&mut self) -> Result<Vec<FileSystem>> {
        self.call("fs", json!({})).await
    }

    pub async fn fs_create(
        &mut self,
        pool: &Pool,
        name: &str,
        size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        self.call(
            "fs_create",
            json!({ "pool": pool, "name": name, "size_bytes": size_bytes }),
        )
        .await
    }

    pub async fn fs_delete(&mut self, fs: &FileSystem) -> Result<Option<String>> {
        self.call("fs_delete", json!({ "fs": fs })).await
    }

    pub async fn fs_resize(
        &mut self,
        fs: &FileSystem,
        new_size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        self.call(
            "fs_resize",
            json!({ "fs": fs, "new_size_bytes": new_size_bytes }),
        )
        .await
    }

    pub async fn fs_clone(
        &mut self,
        src_fs: &FileSystem,
        dest_fs_name: &str,
        snapshot: Option<&FsSnapshot>,
    ) -> Result<AsyncResult<FileSystem>> {
        self.call(
            "fs_clone",
            json!({
                "src_fs": src_fs,
                "dest_fs_name": dest_fs_name,
                "snapshot": snapshot,
            }),
        )
        .await
    }

    pub async fn fs_file_clone(
        &mut self,
        fs: &FileSystem,
        src_file_name: &str,
        dest_file_name: &str,
        snapshot: Option<&FsSnapshot>,
    ) -> Result<Option<String>> {
        self.call(
            "fs_file_clone",
            json!({
                "fs": fs,
                "src_file_name": src_file_name,
                "dest_file_name": dest_file_name,
                "snapshot": snapshot,
            }),
        )
        .await
    }

    pub async fn fs_snapshots(&mut self, fs: &FileSystem) -> Result<Vec<FsSnapshot>> {
        self.call("fs_snapshots", json!({ "fs": fs })).await
    }

    pub async fn fs_snapshot_create(
        &mut self,
        fs: &FileSystem,
        snapshot_name: &str,
    ) -> Result<AsyncResult<FsSnapshot>> {
        self.call(
            "fs_snapshot_create",
            json!({ "fs": fs, "snapshot_name": snapshot_name }),
        )
        .await
    }

    pub async fn fs_snapshot_delete(
        &mut self,
        fs: &FileSystem,
        snapshot: &FsSnapshot,
    ) -> Result<Option<String>> {
        self.call(
            "fs_snapshot_delete",
            json!({ "fs": fs, "snapshot": snapshot }),
        )
        .await
    }

    pub async fn fs_snapshot_restore(
        &mut self,
        fs: &FileSystem,
        snapshot: &FsSnapshot,
        files: &[String],
        restore_files: &[String],
        all_files: bool,
    ) -> Result<Option<String>> {
        self.call(
            "fs_snapshot_restore",
            json!({
                "fs": fs,
                "snapshot": snapshot,
                "files": files,
                "restore_files": restore_files,
                "all_files": all_files,
            }),
        )
        .await
    }

    pub async fn fs_child_dependency(
        &mut self,
        fs: &FileSystem,
        files: &[String],
    ) -> Result<bool> {
        self.call("fs_child_dependency", json!({ "fs": fs, "files": files }))
            .await
    }

    pub async fn fs_child_dependency_rm(
        &mut self,
        fs: &FileSystem,
        files: &[String],
    ) -> Result<Option<String>> {
        self.call("fs_child_dependency_rm", json!({ "fs": fs, "files": files }))
            .await
    }

    pub async fn export_auth(&mut self) -> Result<Vec<String>> {
        self.call("export_auth", json!({})).await
    }

    pub async fn exports(&mut self) -> Result<Vec<NfsExport>> {
        self.call("exports", json!({})).await
    }

    /// Export a file system over NFS.
    #[allow(clippy::too_many_arguments)]
    pub async fn export_fs(
        &mut self,
        fs_id: &str,
        export_path: Option<&str>,
        root_list: &[String],
        rw_list: &[String],
        ro_list: &[String],
        anon_uid: i64,
        anon_gid: i64,
        auth_type: Option<&str>,
        options: Option<&str>,
    ) -> Result<NfsExport> {
        self.call(
            "export_fs",
            json!({
                "fs_id": fs_id,
                "export_path": export_path,
                "root_list": root_list,
                "rw_list": rw_list,
                "ro_list": ro_list,
                "anon_uid": anon_uid,
                "anon_gid": anon_gid,
                "auth_type": auth_type,
                "options": options,
            }),
        )
        .await
    }

    pub async fn export_remove(&mut self, export: &NfsExport) -> Result<()> {
        self.call("export_remove", json!({ "export": export })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorInfo;
    use assert_matches::assert_matches;
    use tokio::net::UnixStream;

    fn sample_volume() -> Volume {
        Volume::new("V1", "vol-one", "", 512, 1 << 21, true, "sys", "pool").unwrap()
    }

    /// Scripted peer answering the handful of methods the tests exercise.
    async fn responder(server: UnixStream) {
        let mut tp = Transport::new(server);
        let mut polls = 0u32;
        while let Ok(Some(req)) = tp.read_request().await {
            let result = match req.method.as_str() {
                "startup" => Value::Null,
                "plugin_info" => json!(["Scripted responder", "9.9.9"]),
                "time_out_get" => json!(30_000),
                "volumes" => json!([sample_volume()]),
                "volume_create" => json!(["JOB_7", null]),
                "job_status" => {
                    polls += 1;
                    if polls < 2 {
                        json!([1, 50, null])
                    } else {
                        json!([2, 100, sample_volume()])
                    }
                }
                "job_free" => Value::Null,
                "shutdown" => {
                    let _ = tp.send_result(req.id, Value::Null).await;
                    break;
                }
                other => {
                    let info = ErrorInfo::new(153, format!("'{other}' is not supported"));
                    let _ = tp.send_error(req.id, &info).await;
                    continue;
                }
            };
            if tp.send_result(req.id, result).await.is_err() {
                break;
            }
        }
    }

    async fn scripted_client() -> Client {
        let (client_end, server_end) = UnixStream::pair().unwrap();
        tokio::spawn(responder(server_end));
        Client::register(
            Transport::new(client_end),
            DeviceUri::parse("sim://").unwrap(),
            None,
            DEFAULT_TIMEOUT_MS,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_plugin_info() {
        let mut client = scripted_client().await;
        assert_eq!(client.uri().scheme, "sim");

        let info = client.plugin_info().await.unwrap();
        assert_eq!(info.description, "Scripted responder");
        assert_eq!(info.version, "9.9.9");
    }

    #[tokio::test]
    async fn test_typed_inventory_decoding() {
        let mut client = scripted_client().await;
        let volumes = client.volumes().await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].size_bytes(), 512 * (1 << 21));
        assert_eq!(client.time_out_get().await.unwrap(), 30_000);
    }

    #[tokio::test]
    async fn test_unsupported_call_surfaces_typed_error() {
        let mut client = scripted_client().await;
        let err = client.export_auth().await.unwrap_err();
        assert_matches!(err, Error::NoSupport(_));
    }

    #[tokio::test]
    async fn test_run_or_wait_polls_pending_job_to_completion() {
        let mut client = scripted_client().await;
        let pool = Pool {
            id: "P1".into(),
            name: "pool".into(),
            element_type: Pool::ELEMENT_TYPE_VOLUME,
            unsupported_actions: 0,
            total_space: 1 << 40,
            free_space: 1 << 40,
            status: Pool::STATUS_OK,
            status_info: String::new(),
            system_id: "sys".into(),
            plugin_data: None,
        };
        let outcome = client
            .volume_create(&pool, "vol-one", 512 * (1 << 21), VolumeProvisionType::Default)
            .await
            .unwrap();
        assert!(outcome.is_pending());

        let volume = client
            .run_or_wait(outcome, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(volume.id, "V1");
    }

    #[tokio::test]
    async fn test_close_shuts_the_session_down() {
        let client = scripted_client().await;
        client.close().await.unwrap();
    }
}
