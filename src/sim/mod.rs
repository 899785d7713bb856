//! Reference simulator backend
//!
//! An in-memory array that implements the full plugin surface, used as a
//! protocol test stand-in and served by the `arraybridge-simd` binary.
//! State mutations happen up front; create/resize/replicate/snapshot calls
//! hand back a pending job whose completion is purely a function of time.

pub mod array;

pub use array::{SimConfig, SimState, BLOCK_SIZE, SIM_SYSTEM_ID};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::capabilities::Capabilities;
use crate::data::{
    AccessGroup, AsyncResult, Battery, BlockRange, Disk, FileSystem, FsSnapshot, InitiatorType,
    NfsExport, Pool, System, TargetPort, Volume, VolumeProvisionType, VolumeReplicateType,
    WireObject,
};
use crate::error::{Error, Result};
use crate::plugin::{JobId, JobPoll, NasPlugin, PluginBase, PluginInfo, SanPlugin};
use crate::uri::DeviceUri;

/// The simulated array behind a single lock
pub struct SimArray {
    state: Mutex<SimState>,
}

impl SimArray {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Mutex::new(SimState::seed(&config)),
        }
    }
}

impl Default for SimArray {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[async_trait]
impl PluginBase for SimArray {
    async fn plugin_register(
        &self,
        uri: &DeviceUri,
        _password: Option<&str>,
        timeout_ms: u32,
    ) -> Result<()> {
        info!(scheme = %uri.scheme, timeout_ms, "session registered");
        self.state.lock().await.timeout_ms = timeout_ms;
        Ok(())
    }

    async fn plugin_unregister(&self) -> Result<()> {
        info!("session unregistered");
        Ok(())
    }

    async fn time_out_set(&self, ms: u32) -> Result<()> {
        self.state.lock().await.timeout_ms = ms;
        Ok(())
    }

    async fn time_out_get(&self) -> Result<u32> {
        Ok(self.state.lock().await.timeout_ms)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobPoll> {
        self.state.lock().await.poll_job(job_id)
    }

    async fn job_free(&self, job_id: &str) -> Result<()> {
        self.state.lock().await.free_job(job_id)
    }

    async fn capabilities(&self, system: &System) -> Result<Capabilities> {
        self.state.lock().await.capabilities(&system.id)
    }

    async fn plugin_info(&self) -> Result<PluginInfo> {
        Ok(PluginInfo {
            description: "ArrayBridge storage array simulator".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }

    async fn pools(&self) -> Result<Vec<Pool>> {
        Ok(self.state.lock().await.pools())
    }

    async fn systems(&self) -> Result<Vec<System>> {
        Ok(vec![self.state.lock().await.system().clone()])
    }
}

#[async_trait]
impl SanPlugin for SimArray {
    async fn volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.state.lock().await.volumes())
    }

    async fn volume_create(
        &self,
        pool: Pool,
        volume_name: String,
        size_bytes: u64,
        provisioning: VolumeProvisionType,
    ) -> Result<AsyncResult<Volume>> {
        if provisioning == VolumeProvisionType::Unknown {
            return Err(Error::InvalidArgument(
                "Unknown provisioning type".into(),
            ));
        }
        let mut st = self.state.lock().await;
        let volume = st.volume_create(&pool.id, &volume_name, size_bytes)?;
        debug!(volume = %volume.id, pool = %pool.id, "volume created");
        let job = st.create_job(Some(WireObject::Volume(volume)));
        Ok(AsyncResult::Pending(job))
    }

    async fn volume_resize(
        &self,
        volume: Volume,
        new_size_bytes: u64,
    ) -> Result<AsyncResult<Volume>> {
        let mut st = self.state.lock().await;
        let resized = st.volume_resize(&volume.id, new_size_bytes)?;
        let job = st.create_job(Some(WireObject::Volume(resized)));
        Ok(AsyncResult::Pending(job))
    }

    async fn volume_replicate(
        &self,
        pool: Option<Pool>,
        _rep_type: VolumeReplicateType,
        volume_src: Volume,
        name: String,
    ) -> Result<AsyncResult<Volume>> {
        let mut st = self.state.lock().await;
        let replica = st.volume_replicate(pool.as_ref().map(|p| p.id.as_str()), &volume_src.id, &name)?;
        let job = st.create_job(Some(WireObject::Volume(replica)));
        Ok(AsyncResult::Pending(job))
    }

    async fn volume_replicate_range_block_size(&self, system: System) -> Result<u32> {
        self.state.lock().await.capabilities(&system.id)?;
        Ok(BLOCK_SIZE as u32)
    }

    async fn volume_replicate_range(
        &self,
        _rep_type: VolumeReplicateType,
        volume_src: Volume,
        volume_dest: Volume,
        ranges: Vec<BlockRange>,
    ) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        st.volume_replicate_range(&volume_src.id, &volume_dest.id, ranges.len())?;
        Ok(Some(st.create_job(None)))
    }

    async fn volume_delete(&self, volume: Volume) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        st.volume_delete(&volume.id)?;
        Ok(Some(st.create_job(None)))
    }

    async fn volume_enable(&self, volume: Volume) -> Result<()> {
        self.state.lock().await.volume_set_enabled(&volume.id, true)
    }

    async fn volume_disable(&self, volume: Volume) -> Result<()> {
        self.state.lock().await.volume_set_enabled(&volume.id, false)
    }

    async fn volume_mask(&self, access_group: AccessGroup, volume: Volume) -> Result<()> {
        self.state.lock().await.volume_mask(&access_group.id, &volume.id)
    }

    async fn volume_unmask(&self, access_group: AccessGroup, volume: Volume) -> Result<()> {
        self.state
            .lock()
            .await
            .volume_unmask(&access_group.id, &volume.id)
    }

    async fn access_groups(&self) -> Result<Vec<AccessGroup>> {
        Ok(self.state.lock().await.access_groups())
    }

    async fn access_group_create(
        &self,
        name: String,
        init_id: String,
        init_type: InitiatorType,
        system: System,
    ) -> Result<AccessGroup> {
        let mut st = self.state.lock().await;
        st.capabilities(&system.id)?;
        st.access_group_create(&name, &init_id, init_type)
    }

    async fn access_group_delete(&self, access_group: AccessGroup) -> Result<()> {
        self.state.lock().await.access_group_delete(&access_group.id)
    }

    async fn access_group_initiator_add(
        &self,
        access_group: AccessGroup,
        init_id: String,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.state
            .lock()
            .await
            .access_group_initiator_add(&access_group.id, &init_id, init_type)
    }

    async fn access_group_initiator_delete(
        &self,
        access_group: AccessGroup,
        init_id: String,
        _init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.state
            .lock()
            .await
            .access_group_initiator_delete(&access_group.id, &init_id)
    }

    async fn volumes_accessible_by_access_group(
        &self,
        access_group: AccessGroup,
    ) -> Result<Vec<Volume>> {
        self.state.lock().await.volumes_masked_to(&access_group.id)
    }

    async fn access_groups_granted_to_volume(&self, volume: Volume) -> Result<Vec<AccessGroup>> {
        self.state.lock().await.access_groups_holding(&volume.id)
    }

    async fn volume_child_dependency(&self, volume: Volume) -> Result<bool> {
        self.state.lock().await.volume_has_children(&volume.id)
    }

    async fn volume_child_dependency_rm(&self, volume: Volume) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        if st.volume_break_children(&volume.id)? {
            Ok(Some(st.create_job(None)))
        } else {
            Ok(None)
        }
    }

    async fn disks(&self) -> Result<Vec<Disk>> {
        Ok(self.state.lock().await.disks())
    }

    async fn target_ports(&self) -> Result<Vec<TargetPort>> {
        Ok(self.state.lock().await.target_ports())
    }

    async fn batteries(&self) -> Result<Vec<Battery>> {
        Ok(self.state.lock().await.batteries())
    }
}

#[async_trait]
impl NasPlugin for SimArray {
    async fn fs(&self) -> Result<Vec<FileSystem>> {
        Ok(self.state.lock().await.filesystems())
    }

    async fn fs_create(
        &self,
        pool: Pool,
        name: String,
        size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        let mut st = self.state.lock().await;
        let fs = st.fs_create(&pool.id, &name, size_bytes)?;
        let job = st.create_job(Some(WireObject::FileSystem(fs)));
        Ok(AsyncResult::Pending(job))
    }

    async fn fs_delete(&self, fs: FileSystem) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        st.fs_delete(&fs.id)?;
        Ok(Some(st.create_job(None)))
    }

    async fn fs_resize(
        &self,
        fs: FileSystem,
        new_size_bytes: u64,
    ) -> Result<AsyncResult<FileSystem>> {
        let mut st = self.state.lock().await;
        let resized = st.fs_resize(&fs.id, new_size_bytes)?;
        let job = st.create_job(Some(WireObject::FileSystem(resized)));
        Ok(AsyncResult::Pending(job))
    }

    async fn fs_clone(
        &self,
        src_fs: FileSystem,
        dest_fs_name: String,
        _snapshot: Option<FsSnapshot>,
    ) -> Result<AsyncResult<FileSystem>> {
        let mut st = self.state.lock().await;
        let clone = st.fs_clone(&src_fs.id, &dest_fs_name)?;
        let job = st.create_job(Some(WireObject::FileSystem(clone)));
        Ok(AsyncResult::Pending(job))
    }

    async fn fs_file_clone(
        &self,
        fs: FileSystem,
        src_file_name: String,
        dest_file_name: String,
        _snapshot: Option<FsSnapshot>,
    ) -> Result<Option<JobId>> {
        if src_file_name.is_empty() || dest_file_name.is_empty() {
            return Err(Error::InvalidArgument(
                "File clone requires source and destination names".into(),
            ));
        }
        let mut st = self.state.lock().await;
        st.fs_exists(&fs.id)?;
        Ok(Some(st.create_job(None)))
    }

    async fn fs_snapshots(&self, fs: FileSystem) -> Result<Vec<FsSnapshot>> {
        self.state.lock().await.fs_snapshots(&fs.id)
    }

    async fn fs_snapshot_create(
        &self,
        fs: FileSystem,
        snapshot_name: String,
    ) -> Result<AsyncResult<FsSnapshot>> {
        let mut st = self.state.lock().await;
        let snapshot = st.fs_snapshot_create(&fs.id, &snapshot_name)?;
        let job = st.create_job(Some(WireObject::FsSnapshot(snapshot)));
        Ok(AsyncResult::Pending(job))
    }

    async fn fs_snapshot_delete(
        &self,
        fs: FileSystem,
        snapshot: FsSnapshot,
    ) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        st.fs_snapshot_delete(&fs.id, &snapshot.id)?;
        Ok(Some(st.create_job(None)))
    }

    async fn fs_snapshot_restore(
        &self,
        fs: FileSystem,
        snapshot: FsSnapshot,
        files: Vec<String>,
        restore_files: Vec<String>,
        all_files: bool,
    ) -> Result<Option<JobId>> {
        if !all_files && files.is_empty() {
            return Err(Error::InvalidArgument(
                "Restore needs a file list unless all_files is set".into(),
            ));
        }
        if !restore_files.is_empty() && restore_files.len() != files.len() {
            return Err(Error::InvalidArgument(
                "restore_files must pair one-to-one with files".into(),
            ));
        }
        let mut st = self.state.lock().await;
        st.fs_snapshot_exists(&fs.id, &snapshot.id)?;
        Ok(Some(st.create_job(None)))
    }

    async fn fs_child_dependency(&self, fs: FileSystem, _files: Vec<String>) -> Result<bool> {
        self.state.lock().await.fs_has_children(&fs.id)
    }

    async fn fs_child_dependency_rm(
        &self,
        fs: FileSystem,
        _files: Vec<String>,
    ) -> Result<Option<JobId>> {
        let mut st = self.state.lock().await;
        if st.fs_break_children(&fs.id)? {
            Ok(Some(st.create_job(None)))
        } else {
            Ok(None)
        }
    }

    async fn export_auth(&self) -> Result<Vec<String>> {
        Ok(vec!["standard".into()])
    }

    async fn exports(&self) -> Result<Vec<NfsExport>> {
        Ok(self.state.lock().await.exports())
    }

    async fn export_fs(
        &self,
        fs_id: String,
        export_path: Option<String>,
        root_list: Vec<String>,
        rw_list: Vec<String>,
        ro_list: Vec<String>,
        anon_uid: i64,
        anon_gid: i64,
        auth_type: Option<String>,
        options: Option<String>,
    ) -> Result<NfsExport> {
        self.state.lock().await.export_fs(
            &fs_id,
            export_path.as_deref(),
            root_list,
            rw_list,
            ro_list,
            anon_uid,
            anon_gid,
            auth_type.as_deref(),
            options.as_deref(),
        )
    }

    async fn export_remove(&self, export: NfsExport) -> Result<()> {
        self.state.lock().await.export_remove(&export.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, DEFAULT_TIMEOUT_MS};
    use crate::data::{JobState, VolumeProvisionType, VolumeReplicateType};
    use crate::plugin::PluginRunner;
    use crate::transport::Transport;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UnixStream;

    const POLL: Duration = Duration::from_millis(2);

    async fn sim_client(job_duration: Duration) -> Client {
        let (client_end, server_end) = UnixStream::pair().unwrap();
        let runner = PluginRunner::new(Arc::new(SimArray::new(SimConfig { job_duration })));
        tokio::spawn(async move {
            let _ = runner.serve(server_end).await;
        });
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
    async fn test_resolve_connect_and_create_through_a_real_socket() {
        use crate::uri::IpcConfig;
        use tokio::net::UnixListener;

        let root = tempfile::tempdir().unwrap();
        let ipc = IpcConfig::with_root(root.path());
        let listener = UnixListener::bind(ipc.plugin_socket("sim")).unwrap();
        let runner = PluginRunner::new(Arc::new(SimArray::new(SimConfig {
            job_duration: Duration::from_millis(10),
        })));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let runner = runner.clone();
                tokio::spawn(async move {
                    let _ = runner.serve(stream).await;
                });
            }
        });

        let mut client = Client::connect_with(&ipc, "sim://", None, DEFAULT_TIMEOUT_MS)
            .await
            .unwrap();
        let pools = client.pools().await.unwrap();
        let pool = pools.iter().find(|p| p.id == "POOL_BLK").unwrap().clone();
        let outcome = client
            .volume_create(&pool, "TestVol", 10 << 20, VolumeProvisionType::Default)
            .await
            .unwrap();
        let volume = client.run_or_wait(outcome, POLL).await.unwrap();
        assert_eq!(volume.size_bytes(), 10 << 20);
        client.close().await.unwrap();

        // An unknown scheme under the same root is a missing plugin.
        let err = Client::connect_with(&ipc, "nope://", None, DEFAULT_TIMEOUT_MS)
            .await
            .unwrap_err();
        assert_matches!(err, Error::PluginNotFound(_));
    }

    #[tokio::test]
    async fn test_full_volume_scenario_over_the_wire() {
        let mut client = sim_client(Duration::from_millis(10)).await;

        let info = client.plugin_info().await.unwrap();
        assert!(info.description.contains("simulator"));

        let systems = client.systems().await.unwrap();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].id, SIM_SYSTEM_ID);

        let caps = client.capabilities(&systems[0]).await.unwrap();
        assert!(caps.supported(crate::capabilities::Capability::VolumeCreate));

        let pools = client.pools().await.unwrap();
        let pool = pools.iter().find(|p| p.id == "POOL_BLK").unwrap().clone();

        let outcome = client
            .volume_create(&pool, "scenario-vol", 10 << 20, VolumeProvisionType::Default)
            .await
            .unwrap();
        assert!(outcome.is_pending());
        let job_id = match &outcome {
            crate::data::AsyncResult::Pending(id) => id.clone(),
            _ => unreachable!(),
        };
        let volume = client.run_or_wait(outcome, POLL).await.unwrap();
        assert_eq!(volume.size_bytes(), 10 << 20);

        // The job was freed by the wait; polling it again must fail.
        let err = client.job_status::<Volume>(&job_id).await.unwrap_err();
        assert_matches!(err, Error::NotFoundJob(_));

        let job = client.volume_delete(&volume).await.unwrap();
        client.finish_job(job, POLL).await.unwrap();
        assert!(client.volumes().await.unwrap().is_empty());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_job_progress_is_observable() {
        let mut client = sim_client(Duration::from_millis(60)).await;
        let pools = client.pools().await.unwrap();
        let pool = pools.iter().find(|p| p.id == "POOL_BLK").unwrap().clone();

        let outcome = client
            .volume_create(&pool, "slow-vol", 1 << 20, VolumeProvisionType::Thin)
            .await
            .unwrap();
        let job_id = match outcome {
            crate::data::AsyncResult::Pending(id) => id,
            _ => panic!("simulator always defers creation to a job"),
        };

        let (state, percent, _) = client.job_status::<Volume>(&job_id).await.unwrap();
        assert_eq!(state, JobState::InProgress);
        assert!(percent < 100);

        let volume: Volume = client.job_wait(&job_id, POLL).await.unwrap();
        assert_eq!(volume.name, "slow-vol");
    }

    #[tokio::test]
    async fn test_masking_and_dependency_over_the_wire() {
        let mut client = sim_client(Duration::ZERO).await;
        let systems = client.systems().await.unwrap();
        let pools = client.pools().await.unwrap();
        let pool = pools.iter().find(|p| p.id == "POOL_BLK").unwrap().clone();

        let outcome = client
            .volume_create(&pool, "masked-vol", 1 << 20, VolumeProvisionType::Default)
            .await
            .unwrap();
        let volume = client.run_or_wait(outcome, POLL).await.unwrap();

        let group = client
            .access_group_create(
                "hosts-a",
                "iqn.1994-05.com.example:host-a",
                InitiatorType::IscsiIqn,
                &systems[0],
            )
            .await
            .unwrap();

        client.volume_mask(&group, &volume).await.unwrap();
        let err = client.volume_delete(&volume).await.unwrap_err();
        assert_matches!(err, Error::IsMasked(_));

        let granted = client.access_groups_granted_to_volume(&volume).await.unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].id, group.id);

        // Replica child blocks deletion even after unmasking.
        let outcome = client
            .volume_replicate(None, VolumeReplicateType::Clone, &volume, "masked-copy")
            .await
            .unwrap();
        client.run_or_wait(outcome, POLL).await.unwrap();
        client.volume_unmask(&group, &volume).await.unwrap();

        let err = client.volume_delete(&volume).await.unwrap_err();
        assert_matches!(err, Error::HasChildDependency(_));
        assert!(client.volume_child_dependency(&volume).await.unwrap());

        let job = client.volume_child_dependency_rm(&volume).await.unwrap();
        client.finish_job(job, POLL).await.unwrap();
        let job = client.volume_delete(&volume).await.unwrap();
        client.finish_job(job, POLL).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_and_export_over_the_wire() {
        let mut client = sim_client(Duration::ZERO).await;
        let pools = client.pools().await.unwrap();
        let pool = pools.iter().find(|p| p.id == "POOL_FS").unwrap().clone();

        let outcome = client.fs_create(&pool, "projects", 1 << 30).await.unwrap();
        let fs = client.run_or_wait(outcome, POLL).await.unwrap();

        let outcome = client.fs_snapshot_create(&fs, "nightly").await.unwrap();
        let snapshot = client.run_or_wait(outcome, POLL).await.unwrap();
        assert_eq!(snapshot.name, "nightly");

        let export = client
            .export_fs(
                &fs.id,
                None,
                &[],
                &["client1.example.com".into()],
                &[],
                NfsExport::ANON_UID_GID_NA,
                NfsExport::ANON_UID_GID_NA,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(export.fs_id, fs.id);
        assert_eq!(client.exports().await.unwrap().len(), 1);
        assert_eq!(client.export_auth().await.unwrap(), vec!["standard"]);

        client.export_remove(&export).await.unwrap();

        let err = client.fs_delete(&fs).await.unwrap_err();
        assert_matches!(err, Error::HasChildDependency(_));
        let job = client.fs_snapshot_delete(&fs, &snapshot).await.unwrap();
        client.finish_job(job, POLL).await.unwrap();
        let job = client.fs_delete(&fs).await.unwrap();
        client.finish_job(job, POLL).await.unwrap();
        assert!(client.fs().await.unwrap().is_empty());
    }
}
