//! Simulated array state and job table
//!
//! Everything lives in one `SimState` value; the async layer in `mod.rs`
//! serializes access through a single mutex. Mutations apply immediately;
//! the job table only delays when the caller gets to see the outcome, with
//! percent derived from elapsed time over the configured duration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::capabilities::Capabilities;
use crate::data::{
    validate, AccessGroup, Battery, BatteryType, Disk, DiskLinkType, DiskType, FileSystem,
    FsSnapshot, InitiatorType, JobState, NfsExport, Pool, PortType, System, SystemMode, TargetPort,
    Volume, WireObject,
};
use crate::error::{Error, Result};

pub const SIM_SYSTEM_ID: &str = "sim-01";

pub const BLOCK_SIZE: u64 = 512;

/// Tuning for the simulated backend
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// How long every simulated job takes to complete
    pub job_duration: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            job_duration: Duration::from_millis(100),
        }
    }
}

struct Job {
    started: Instant,
    duration: Duration,
    item: Option<WireObject>,
}

impl Job {
    fn poll(&self) -> (JobState, u8) {
        if self.duration.is_zero() {
            return (JobState::Complete, 100);
        }
        let frac = self.started.elapsed().as_secs_f64() / self.duration.as_secs_f64();
        if frac >= 1.0 {
            (JobState::Complete, 100)
        } else {
            (JobState::InProgress, (frac * 100.0) as u8)
        }
    }
}

/// The whole simulated array
pub struct SimState {
    job_duration: Duration,
    next_id: u64,
    next_job: u64,
    pub timeout_ms: u32,
    system: System,
    caps: Capabilities,
    pools: Vec<Pool>,
    volumes: Vec<Volume>,
    disks: Vec<Disk>,
    target_ports: Vec<TargetPort>,
    batteries: Vec<Battery>,
    access_groups: Vec<AccessGroup>,
    /// (access group id, volume id) masking pairs
    masks: Vec<(String, String)>,
    /// Parent volume id -> replica child volume ids
    vol_children: HashMap<String, Vec<String>>,
    filesystems: Vec<FileSystem>,
    /// File system id -> its snapshots
    snapshots: HashMap<String, Vec<FsSnapshot>>,
    /// Source fs id -> clone child fs ids
    fs_children: HashMap<String, Vec<String>>,
    exports: Vec<NfsExport>,
    jobs: HashMap<String, Job>,
}

impl SimState {
    pub fn seed(config: &SimConfig) -> Self {
        let system = System {
            id: SIM_SYSTEM_ID.into(),
            name: "ArrayBridge simulated array".into(),
            status: System::STATUS_OK,
            status_info: String::new(),
            fw_version: "1.4.299".into(),
            read_cache_pct: 100,
            mode: SystemMode::HardwareRaid,
            plugin_data: None,
        };

        let pool = |id: &str, name: &str, element_type: u64| Pool {
            id: id.into(),
            name: name.into(),
            element_type,
            unsupported_actions: 0,
            total_space: 2 << 40,
            free_space: 2 << 40,
            status: Pool::STATUS_OK,
            status_info: String::new(),
            system_id: SIM_SYSTEM_ID.into(),
            plugin_data: None,
        };
        let pools = vec![
            pool(
                "POOL_BLK",
                "pool-block",
                Pool::ELEMENT_TYPE_VOLUME
                    | Pool::ELEMENT_TYPE_VOLUME_FULL
                    | Pool::ELEMENT_TYPE_VOLUME_THIN
                    | Pool::ELEMENT_TYPE_DELTA,
            ),
            pool(
                "POOL_FS",
                "pool-file",
                Pool::ELEMENT_TYPE_FS | Pool::ELEMENT_TYPE_DELTA,
            ),
        ];

        let disk = |n: u64| Disk {
            id: format!("DISK_{n}"),
            name: format!("sas-disk-{n}"),
            disk_type: DiskType::Sas,
            block_size: BLOCK_SIZE,
            num_of_blocks: 4 << 31,
            status: Disk::STATUS_OK | Disk::STATUS_FREE,
            system_id: SIM_SYSTEM_ID.into(),
            location: Some(format!("enclosure-0 slot-{n}")),
            rpm: Some(15_000),
            link_type: Some(DiskLinkType::Sas),
            vpd83: Some(format!("6{n:031x}")),
            plugin_data: None,
        };
        let disks = (1..=4).map(disk).collect();

        let target_ports = vec![
            TargetPort {
                id: "PORT_FC_1".into(),
                port_type: PortType::Fc,
                service_address: "50:0a:09:86:99:4b:8d:c5".into(),
                network_address: "50:0a:09:86:99:4b:8d:c5".into(),
                physical_address: "50:0a:09:86:99:4b:8d:c5".into(),
                physical_name: "FC_a_0b".into(),
                system_id: SIM_SYSTEM_ID.into(),
                plugin_data: None,
            },
            TargetPort {
                id: "PORT_ISCSI_1".into(),
                port_type: PortType::Iscsi,
                service_address: "iqn.1986-05.com.example:sim-tgt-1".into(),
                network_address: "sim-iscsi-tgt-1.example.com:3260".into(),
                physical_address: "a4:4e:31:47:f4:e0".into(),
                physical_name: "iSCSI_c_0d".into(),
                system_id: SIM_SYSTEM_ID.into(),
                plugin_data: None,
            },
        ];

        let batteries = vec![Battery {
            id: "BAT_1".into(),
            name: "Battery SIMB01".into(),
            battery_type: BatteryType::Chemical,
            status: Battery::STATUS_OK,
            system_id: SIM_SYSTEM_ID.into(),
            plugin_data: None,
        }];

        let mut caps = Capabilities::new();
        caps.enable_all();

        Self {
            job_duration: config.job_duration,
            next_id: 0,
            next_job: 0,
            timeout_ms: 30_000,
            system,
            caps,
            pools,
            volumes: Vec::new(),
            disks,
            target_ports,
            batteries,
            access_groups: Vec::new(),
            masks: Vec::new(),
            vol_children: HashMap::new(),
            filesystems: Vec::new(),
            snapshots: HashMap::new(),
            fs_children: HashMap::new(),
            exports: Vec::new(),
            jobs: HashMap::new(),
        }
    }

    fn next_object(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub fn create_job(&mut self, item: Option<WireObject>) -> String {
        self.next_job += 1;
        let id = format!("JOB_{}", self.next_job);
        self.jobs.insert(
            id.clone(),
            Job {
                started: Instant::now(),
                duration: self.job_duration,
                item,
            },
        );
        id
    }

    pub fn poll_job(&self, job_id: &str) -> Result<(JobState, u8, Option<WireObject>)> {
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| Error::NotFoundJob(job_id.into()))?;
        let (state, percent) = job.poll();
        let item = match state {
            JobState::Complete => job.item.clone(),
            _ => None,
        };
        Ok((state, percent, item))
    }

    pub fn free_job(&mut self, job_id: &str) -> Result<()> {
        self.jobs
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFoundJob(job_id.into()))
    }

    // ------------------------------------------------------------------
    // Inventory
    // ------------------------------------------------------------------

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn capabilities(&self, system_id: &str) -> Result<Capabilities> {
        if system_id != self.system.id {
            return Err(Error::NotFoundSystem(system_id.into()));
        }
        Ok(self.caps.clone())
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.pools.clone()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.volumes.clone()
    }

    pub fn disks(&self) -> Vec<Disk> {
        self.disks.clone()
    }

    pub fn target_ports(&self) -> Vec<TargetPort> {
        self.target_ports.clone()
    }

    pub fn batteries(&self) -> Vec<Battery> {
        self.batteries.clone()
    }

    pub fn filesystems(&self) -> Vec<FileSystem> {
        self.filesystems.clone()
    }

    pub fn access_groups(&self) -> Vec<AccessGroup> {
        self.access_groups.clone()
    }

    pub fn exports(&self) -> Vec<NfsExport> {
        self.exports.clone()
    }

    fn pool_mut(&mut self, pool_id: &str) -> Result<&mut Pool> {
        self.pools
            .iter_mut()
            .find(|p| p.id == pool_id)
            .ok_or_else(|| Error::NotFoundPool(pool_id.into()))
    }

    fn volume_mut(&mut self, volume_id: &str) -> Result<&mut Volume> {
        self.volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| Error::NotFoundVolume(volume_id.into()))
    }

    fn volume_ref(&self, volume_id: &str) -> Result<&Volume> {
        self.volumes
            .iter()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| Error::NotFoundVolume(volume_id.into()))
    }

    fn fs_ref(&self, fs_id: &str) -> Result<&FileSystem> {
        self.filesystems
            .iter()
            .find(|f| f.id == fs_id)
            .ok_or_else(|| Error::NotFoundFs(fs_id.into()))
    }

    fn access_group_ref(&self, ag_id: &str) -> Result<&AccessGroup> {
        self.access_groups
            .iter()
            .find(|g| g.id == ag_id)
            .ok_or_else(|| Error::NotFoundAccessGroup(ag_id.into()))
    }

    fn debit_pool(&mut self, pool_id: &str, size_bytes: u64) -> Result<()> {
        let pool = self.pool_mut(pool_id)?;
        if pool.free_space < size_bytes {
            return Err(Error::NotEnoughSpace(format!(
                "Pool '{pool_id}' has {} bytes free, {size_bytes} requested",
                pool.free_space
            )));
        }
        pool.free_space -= size_bytes;
        Ok(())
    }

    fn credit_pool(&mut self, pool_id: &str, size_bytes: u64) {
        if let Ok(pool) = self.pool_mut(pool_id) {
            pool.free_space = (pool.free_space + size_bytes).min(pool.total_space);
        }
    }

    // ------------------------------------------------------------------
    // Volumes
    // ------------------------------------------------------------------

    fn new_vpd83(&mut self) -> String {
        self.next_id += 1;
        format!("6{:031x}", self.next_id)
    }

    pub fn volume_create(&mut self, pool_id: &str, name: &str, size_bytes: u64) -> Result<Volume> {
        if size_bytes == 0 {
            return Err(Error::InvalidArgument("Volume size must be non-zero".into()));
        }
        self.pool_mut(pool_id)?;
        if self.volumes.iter().any(|v| v.name == name) {
            return Err(Error::NameConflict(format!("Volume name '{name}' in use")));
        }
        let num_of_blocks = size_bytes.div_ceil(BLOCK_SIZE);
        let rounded = num_of_blocks.checked_mul(BLOCK_SIZE).ok_or_else(|| {
            Error::InvalidArgument(format!("Volume size {size_bytes} is out of range"))
        })?;
        self.debit_pool(pool_id, rounded)?;
        let id = self.next_object("VOL");
        let vpd83 = self.new_vpd83();
        let volume = Volume::new(
            id,
            name,
            vpd83,
            BLOCK_SIZE,
            num_of_blocks,
            true,
            SIM_SYSTEM_ID,
            pool_id,
        )?;
        self.volumes.push(volume.clone());
        Ok(volume)
    }

    pub fn volume_resize(&mut self, volume_id: &str, new_size_bytes: u64) -> Result<Volume> {
        let current = self.volume_ref(volume_id)?.clone();
        let new_blocks = new_size_bytes.div_ceil(BLOCK_SIZE);
        if new_blocks.checked_mul(BLOCK_SIZE).is_none() {
            return Err(Error::InvalidArgument(format!(
                "Volume size {new_size_bytes} is out of range"
            )));
        }
        if new_blocks == current.num_of_blocks {
            return Err(Error::NoStateChange(format!(
                "Volume '{volume_id}' is already {new_size_bytes} bytes"
            )));
        }
        if new_blocks > current.num_of_blocks {
            let grow = (new_blocks - current.num_of_blocks) * BLOCK_SIZE;
            self.debit_pool(&current.pool_id, grow)?;
        } else {
            let shrink = (current.num_of_blocks - new_blocks) * BLOCK_SIZE;
            self.credit_pool(&current.pool_id, shrink);
        }
        let volume = self.volume_mut(volume_id)?;
        volume.num_of_blocks = new_blocks;
        Ok(volume.clone())
    }

    /// Create a replica volume and record the parent/child dependency.
    pub fn volume_replicate(
        &mut self,
        pool_id: Option<&str>,
        src_volume_id: &str,
        name: &str,
    ) -> Result<Volume> {
        let src = self.volume_ref(src_volume_id)?.clone();
        let pool_id = pool_id.unwrap_or(&src.pool_id).to_string();
        let replica = self.volume_create(&pool_id, name, src.size_bytes())?;
        self.vol_children
            .entry(src.id)
            .or_default()
            .push(replica.id.clone());
        Ok(replica)
    }

    pub fn volume_delete(&mut self, volume_id: &str) -> Result<()> {
        let volume = self.volume_ref(volume_id)?.clone();
        if self.masks.iter().any(|(_, vid)| vid == volume_id) {
            return Err(Error::IsMasked(format!(
                "Volume '{volume_id}' is masked to an access group"
            )));
        }
        if self
            .vol_children
            .get(volume_id)
            .is_some_and(|c| !c.is_empty())
        {
            return Err(Error::HasChildDependency(format!(
                "Volume '{volume_id}' has replica children"
            )));
        }
        self.volumes.retain(|v| v.id != volume_id);
        self.vol_children.remove(volume_id);
        for children in self.vol_children.values_mut() {
            children.retain(|c| c != volume_id);
        }
        self.credit_pool(&volume.pool_id, volume.size_bytes());
        Ok(())
    }

    pub fn volume_set_enabled(&mut self, volume_id: &str, enabled: bool) -> Result<()> {
        let volume = self.volume_mut(volume_id)?;
        if volume.enabled == enabled {
            return Err(Error::NoStateChange(format!(
                "Volume '{volume_id}' is already {}",
                if enabled { "enabled" } else { "disabled" }
            )));
        }
        volume.enabled = enabled;
        Ok(())
    }

    pub fn volume_replicate_range(
        &mut self,
        src_volume_id: &str,
        dest_volume_id: &str,
        range_count: usize,
    ) -> Result<()> {
        self.volume_ref(src_volume_id)?;
        self.volume_ref(dest_volume_id)?;
        if range_count == 0 {
            return Err(Error::InvalidArgument(
                "Range copy requires at least one block range".into(),
            ));
        }
        Ok(())
    }

    pub fn volume_has_children(&self, volume_id: &str) -> Result<bool> {
        self.volume_ref(volume_id)?;
        Ok(self
            .vol_children
            .get(volume_id)
            .is_some_and(|c| !c.is_empty()))
    }

    /// Break all replica relationships below a volume. Returns whether
    /// there was anything to break.
    pub fn volume_break_children(&mut self, volume_id: &str) -> Result<bool> {
        let had = self.volume_has_children(volume_id)?;
        self.vol_children.remove(volume_id);
        Ok(had)
    }

    // ------------------------------------------------------------------
    // Access groups and masking
    // ------------------------------------------------------------------

    /// Membership check over every group; `init_id` must already be in
    /// the normalized form stored by [`AccessGroup::new`].
    fn initiator_in_use(&self, init_id: &str) -> bool {
        self.access_groups
            .iter()
            .any(|g| g.init_ids.iter().any(|i| i == init_id))
    }

    pub fn access_group_create(
        &mut self,
        name: &str,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        if self.access_groups.iter().any(|g| g.name == name) {
            return Err(Error::NameConflict(format!(
                "Access group name '{name}' in use"
            )));
        }
        let (_, init_id) = validate::initiator_id_verify(init_id)?;
        if self.initiator_in_use(&init_id) {
            return Err(Error::ExistsInitiator(format!(
                "Initiator '{init_id}' already belongs to an access group"
            )));
        }
        let id = self.next_object("AG");
        let group = AccessGroup::new(id, name, vec![init_id], init_type, SIM_SYSTEM_ID)?;
        self.access_groups.push(group.clone());
        Ok(group)
    }

    pub fn access_group_delete(&mut self, ag_id: &str) -> Result<()> {
        self.access_group_ref(ag_id)?;
        if self.masks.iter().any(|(gid, _)| gid == ag_id) {
            return Err(Error::IsMasked(format!(
                "Access group '{ag_id}' still has masked volumes"
            )));
        }
        self.access_groups.retain(|g| g.id != ag_id);
        Ok(())
    }

    pub fn access_group_initiator_add(
        &mut self,
        ag_id: &str,
        init_id: &str,
        init_type: InitiatorType,
    ) -> Result<AccessGroup> {
        self.access_group_ref(ag_id)?;
        let (_, init_id) = validate::initiator_id_verify(init_id)?;
        if self.initiator_in_use(&init_id) {
            return Err(Error::ExistsInitiator(format!(
                "Initiator '{init_id}' already belongs to an access group"
            )));
        }
        let current = self.access_group_ref(ag_id)?.clone();
        let mut init_ids = current.init_ids.clone();
        init_ids.push(init_id);
        // Rebuild through the constructor so the new id is validated and
        // normalized like the rest.
        let mut rebuilt =
            AccessGroup::new(current.id, current.name, init_ids, init_type, current.system_id)?;
        rebuilt.plugin_data = current.plugin_data;
        let slot = self
            .access_groups
            .iter_mut()
            .find(|g| g.id == ag_id)
            .ok_or_else(|| Error::NotFoundAccessGroup(ag_id.into()))?;
        *slot = rebuilt.clone();
        Ok(rebuilt)
    }

    pub fn access_group_initiator_delete(
        &mut self,
        ag_id: &str,
        init_id: &str,
    ) -> Result<AccessGroup> {
        let group = self.access_group_ref(ag_id)?.clone();
        if !group.init_ids.iter().any(|i| i == init_id) {
            return Err(Error::NoStateChange(format!(
                "Initiator '{init_id}' is not in access group '{ag_id}'"
            )));
        }
        if group.init_ids.len() == 1 {
            return Err(Error::LastInitInAccessGroup(format!(
                "Access group '{ag_id}' would be left without initiators"
            )));
        }
        let slot = self
            .access_groups
            .iter_mut()
            .find(|g| g.id == ag_id)
            .ok_or_else(|| Error::NotFoundAccessGroup(ag_id.into()))?;
        slot.init_ids.retain(|i| i != init_id);
        Ok(slot.clone())
    }

    pub fn volume_mask(&mut self, ag_id: &str, volume_id: &str) -> Result<()> {
        let group = self.access_group_ref(ag_id)?;
        if group.init_ids.is_empty() {
            return Err(Error::EmptyAccessGroup(format!(
                "Access group '{ag_id}' has no initiators"
            )));
        }
        self.volume_ref(volume_id)?;
        let pair = (ag_id.to_string(), volume_id.to_string());
        if self.masks.contains(&pair) {
            return Err(Error::NoStateChange(format!(
                "Volume '{volume_id}' is already masked to '{ag_id}'"
            )));
        }
        self.masks.push(pair);
        Ok(())
    }

    pub fn volume_unmask(&mut self, ag_id: &str, volume_id: &str) -> Result<()> {
        self.access_group_ref(ag_id)?;
        self.volume_ref(volume_id)?;
        let pair = (ag_id.to_string(), volume_id.to_string());
        if !self.masks.contains(&pair) {
            return Err(Error::NoStateChange(format!(
                "Volume '{volume_id}' is not masked to '{ag_id}'"
            )));
        }
        self.masks.retain(|p| *p != pair);
        Ok(())
    }

    pub fn volumes_masked_to(&self, ag_id: &str) -> Result<Vec<Volume>> {
        self.access_group_ref(ag_id)?;
        Ok(self
            .volumes
            .iter()
            .filter(|v| self.masks.iter().any(|(g, vid)| g == ag_id && *vid == v.id))
            .cloned()
            .collect())
    }

    pub fn access_groups_holding(&self, volume_id: &str) -> Result<Vec<AccessGroup>> {
        self.volume_ref(volume_id)?;
        Ok(self
            .access_groups
            .iter()
            .filter(|g| {
                self.masks
                    .iter()
                    .any(|(gid, v)| *gid == g.id && v == volume_id)
            })
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // File systems
    // ------------------------------------------------------------------

    pub fn fs_create(&mut self, pool_id: &str, name: &str, size_bytes: u64) -> Result<FileSystem> {
        self.pool_mut(pool_id)?;
        if self.filesystems.iter().any(|f| f.name == name) {
            return Err(Error::NameConflict(format!(
                "File system name '{name}' in use"
            )));
        }
        self.debit_pool(pool_id, size_bytes)?;
        let id = self.next_object("FS");
        let fs = FileSystem {
            id,
            name: name.into(),
            total_space: size_bytes,
            free_space: size_bytes,
            pool_id: pool_id.into(),
            system_id: SIM_SYSTEM_ID.into(),
            plugin_data: None,
        };
        self.filesystems.push(fs.clone());
        Ok(fs)
    }

    pub fn fs_resize(&mut self, fs_id: &str, new_size_bytes: u64) -> Result<FileSystem> {
        let current = self.fs_ref(fs_id)?.clone();
        if new_size_bytes == current.total_space {
            return Err(Error::NoStateChange(format!(
                "File system '{fs_id}' is already {new_size_bytes} bytes"
            )));
        }
        if new_size_bytes > current.total_space {
            self.debit_pool(&current.pool_id, new_size_bytes - current.total_space)?;
        } else {
            self.credit_pool(&current.pool_id, current.total_space - new_size_bytes);
        }
        let used = current.total_space - current.free_space;
        let fs = self
            .filesystems
            .iter_mut()
            .find(|f| f.id == fs_id)
            .ok_or_else(|| Error::NotFoundFs(fs_id.into()))?;
        fs.total_space = new_size_bytes;
        fs.free_space = new_size_bytes.saturating_sub(used);
        Ok(fs.clone())
    }

    pub fn fs_delete(&mut self, fs_id: &str) -> Result<()> {
        let fs = self.fs_ref(fs_id)?.clone();
        if self.snapshots.get(fs_id).is_some_and(|s| !s.is_empty())
            || self.fs_children.get(fs_id).is_some_and(|c| !c.is_empty())
        {
            return Err(Error::HasChildDependency(format!(
                "File system '{fs_id}' has snapshots or clone children"
            )));
        }
        self.filesystems.retain(|f| f.id != fs_id);
        self.exports.retain(|e| e.fs_id != fs_id);
        self.snapshots.remove(fs_id);
        self.fs_children.remove(fs_id);
        for children in self.fs_children.values_mut() {
            children.retain(|c| c != fs_id);
        }
        self.credit_pool(&fs.pool_id, fs.total_space);
        Ok(())
    }

    pub fn fs_clone(&mut self, src_fs_id: &str, dest_name: &str) -> Result<FileSystem> {
        let src = self.fs_ref(src_fs_id)?.clone();
        let clone = self.fs_create(&src.pool_id, dest_name, src.total_space)?;
        self.fs_children
            .entry(src.id)
            .or_default()
            .push(clone.id.clone());
        Ok(clone)
    }

    pub fn fs_exists(&self, fs_id: &str) -> Result<()> {
        self.fs_ref(fs_id).map(|_| ())
    }

    pub fn fs_snapshots(&self, fs_id: &str) -> Result<Vec<FsSnapshot>> {
        self.fs_ref(fs_id)?;
        Ok(self.snapshots.get(fs_id).cloned().unwrap_or_default())
    }

    pub fn fs_snapshot_create(&mut self, fs_id: &str, name: &str) -> Result<FsSnapshot> {
        self.fs_ref(fs_id)?;
        if self
            .snapshots
            .get(fs_id)
            .is_some_and(|s| s.iter().any(|snap| snap.name == name))
        {
            return Err(Error::NameConflict(format!(
                "Snapshot name '{name}' in use on '{fs_id}'"
            )));
        }
        let snapshot = FsSnapshot {
            id: self.next_object("SNAP"),
            name: name.into(),
            ts: chrono::Utc::now().timestamp(),
            plugin_data: None,
        };
        self.snapshots
            .entry(fs_id.to_string())
            .or_default()
            .push(snapshot.clone());
        Ok(snapshot)
    }

    pub fn fs_snapshot_delete(&mut self, fs_id: &str, snapshot_id: &str) -> Result<()> {
        self.fs_ref(fs_id)?;
        let snaps = self
            .snapshots
            .get_mut(fs_id)
            .filter(|s| s.iter().any(|snap| snap.id == snapshot_id))
            .ok_or_else(|| Error::NotFoundFsSnapshot(snapshot_id.into()))?;
        snaps.retain(|snap| snap.id != snapshot_id);
        Ok(())
    }

    pub fn fs_snapshot_exists(&self, fs_id: &str, snapshot_id: &str) -> Result<()> {
        self.fs_ref(fs_id)?;
        if self
            .snapshots
            .get(fs_id)
            .is_some_and(|s| s.iter().any(|snap| snap.id == snapshot_id))
        {
            Ok(())
        } else {
            Err(Error::NotFoundFsSnapshot(snapshot_id.into()))
        }
    }

    pub fn fs_has_children(&self, fs_id: &str) -> Result<bool> {
        self.fs_ref(fs_id)?;
        Ok(self.snapshots.get(fs_id).is_some_and(|s| !s.is_empty())
            || self.fs_children.get(fs_id).is_some_and(|c| !c.is_empty()))
    }

    /// Drop snapshot and clone dependencies below a file system. Returns
    /// whether there was anything to drop.
    pub fn fs_break_children(&mut self, fs_id: &str) -> Result<bool> {
        let had = self.fs_has_children(fs_id)?;
        self.snapshots.remove(fs_id);
        self.fs_children.remove(fs_id);
        Ok(had)
    }

    // ------------------------------------------------------------------
    // NFS exports
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn export_fs(
        &mut self,
        fs_id: &str,
        export_path: Option<&str>,
        root: Vec<String>,
        rw: Vec<String>,
        ro: Vec<String>,
        anon_uid: i64,
        anon_gid: i64,
        auth_type: Option<&str>,
        options: Option<&str>,
    ) -> Result<NfsExport> {
        let fs = self.fs_ref(fs_id)?.clone();
        let path = match export_path {
            Some(p) => p.to_string(),
            None => format!("/nfs/{}", fs.name),
        };
        if self.exports.iter().any(|e| e.export_path == path) {
            return Err(Error::NameConflict(format!(
                "Export path '{path}' in use"
            )));
        }
        let export = NfsExport::new(
            self.next_object("EXP"),
            fs_id,
            path,
            auth_type.unwrap_or("standard"),
            root,
            rw,
            ro,
            anon_uid,
            anon_gid,
            options.unwrap_or(""),
        )?;
        self.exports.push(export.clone());
        Ok(export)
    }

    pub fn export_remove(&mut self, export_id: &str) -> Result<()> {
        if !self.exports.iter().any(|e| e.id == export_id) {
            return Err(Error::NotFoundNfsExport(export_id.into()));
        }
        self.exports.retain(|e| e.id != export_id);
        Ok(())
    }
}
