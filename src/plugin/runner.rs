//! Method dispatcher and per-connection serve loop
//!
//! One `PluginRunner` serves one accepted unix-socket connection. Every
//! request is decoded, bound to a closed method set, dispatched to the
//! plugin trait object, and answered with exactly one result or error
//! frame. Native errors never cross the wire raw; they are converted to
//! the numbered error envelope first.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorInfo, Result};
use crate::plugin::StoragePlugin;
use crate::transport::{Request, Transport};
use crate::uri::DeviceUri;

macro_rules! methods {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Closed set of wire method names. Anything outside this set is
        /// answered with `NoSupport` before the plugin is consulted.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Method {
            $($variant),+
        }

        impl Method {
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }
    };
}

methods! {
    Startup => "startup",
    Shutdown => "shutdown",
    TimeOutSet => "time_out_set",
    TimeOutGet => "time_out_get",
    JobStatus => "job_status",
    JobFree => "job_free",
    Capabilities => "capabilities",
    PluginInfo => "plugin_info",
    Pools => "pools",
    Systems => "systems",
    Volumes => "volumes",
    VolumeCreate => "volume_create",
    VolumeResize => "volume_resize",
    VolumeReplicate => "volume_replicate",
    VolumeReplicateRangeBlockSize => "volume_replicate_range_block_size",
    VolumeReplicateRange => "volume_replicate_range",
    VolumeDelete => "volume_delete",
    VolumeEnable => "volume_enable",
    VolumeDisable => "volume_disable",
    VolumeMask => "volume_mask",
    VolumeUnmask => "volume_unmask",
    AccessGroups => "access_groups",
    AccessGroupCreate => "access_group_create",
    AccessGroupDelete => "access_group_delete",
    AccessGroupInitiatorAdd => "access_group_initiator_add",
    AccessGroupInitiatorDelete => "access_group_initiator_delete",
    VolumesAccessibleByAccessGroup => "volumes_accessible_by_access_group",
    AccessGroupsGrantedToVolume => "access_groups_granted_to_volume",
    VolumeChildDependency => "volume_child_dependency",
    VolumeChildDependencyRm => "volume_child_dependency_rm",
    Disks => "disks",
    TargetPorts => "target_ports",
    Batteries => "batteries",
    Fs => "fs",
    FsCreate => "fs_create",
    FsDelete => "fs_delete",
    FsResize => "fs_resize",
    FsClone => "fs_clone",
    FsFileClone => "fs_file_clone",
    FsSnapshots => "fs_snapshots",
    FsSnapshotCreate => "fs_snapshot_create",
    FsSnapshotDelete => "fs_snapshot_delete",
    FsSnapshotRestore => "fs_snapshot_restore",
    FsChildDependency => "fs_child_dependency",
    FsChildDependencyRm => "fs_child_dependency_rm",
    ExportAuth => "export_auth",
    Exports => "exports",
    ExportFs => "export_fs",
    ExportRemove => "export_remove",
}

/// Pull a required named parameter out of the request map.
fn arg<T: DeserializeOwned>(params: &Map<String, Value>, name: &str) -> Result<T> {
    let value = params.get(name).ok_or_else(|| {
        Error::TransportInvalidArg(format!("Missing required parameter '{name}'"))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| Error::InvalidArgument(format!("Parameter '{name}': {e}")))
}

/// An optional named parameter; absent and JSON null both map to `None`.
fn opt_arg<T: DeserializeOwned>(params: &Map<String, Value>, name: &str) -> Result<Option<T>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| Error::InvalidArgument(format!("Parameter '{name}': {e}"))),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(Error::from)
}

/// Serves one plugin over one connection
pub struct PluginRunner<P> {
    plugin: Arc<P>,
}

impl<P> Clone for PluginRunner<P> {
    fn clone(&self) -> Self {
        Self {
            plugin: Arc::clone(&self.plugin),
        }
    }
}

impl<P: StoragePlugin> PluginRunner<P> {
    pub fn new(plugin: Arc<P>) -> Self {
        Self { plugin }
    }

    /// Run the request loop until the client shuts down or disappears.
    ///
    /// If the client vanishes after a successful `startup` the plugin's
    /// teardown still runs, so backend sessions are not leaked.
    pub async fn serve(&self, stream: UnixStream) -> Result<()> {
        let mut transport = Transport::new(stream);
        let mut registered = false;

        loop {
            let request = match transport.read_request().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("client closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read request, dropping connection");
                    break;
                }
            };

            let method = match Method::from_name(&request.method) {
                Some(method) => method,
                None => {
                    let err = Error::NoSupport(format!(
                        "Operation '{}' is not supported",
                        request.method
                    ));
                    if let Err(e) = transport.send_error(request.id, &ErrorInfo::from(&err)).await {
                        warn!(error = %e, "failed to send reply, dropping connection");
                        break;
                    }
                    continue;
                }
            };

            if !registered && method != Method::Startup {
                let err = Error::TransportInvalidArg(format!(
                    "Method '{}' called before startup",
                    method.name()
                ));
                if let Err(e) = transport.send_error(request.id, &ErrorInfo::from(&err)).await {
                    warn!(error = %e, "failed to send reply, dropping connection");
                    break;
                }
                continue;
            }

            debug!(method = method.name(), "dispatching request");
            match self.dispatch(method, &request).await {
                Ok(result) => {
                    if let Err(e) = transport.send_result(request.id, result).await {
                        warn!(error = %e, "failed to send reply, dropping connection");
                        break;
                    }
                    match method {
                        Method::Startup => registered = true,
                        Method::Shutdown => {
                            registered = false;
                            break;
                        }
                        _ => {}
                    }
                }
                Err(e) => {
                    debug!(method = method.name(), error = %e, "request failed");
                    if let Err(e) = transport.send_error(request.id, &ErrorInfo::from(&e)).await {
                        warn!(error = %e, "failed to send reply, dropping connection");
                        break;
                    }
                }
            }
        }

        if registered {
            info!("client disappeared while registered, running teardown");
            if let Err(e) = self.plugin.plugin_unregister().await {
                warn!(error = %e, "teardown after lost client failed");
            }
        }
        transport.close().await;
        Ok(())
    }

    async fn dispatch(&self, method: Method, request: &Request) -> Result<Value> {
        let empty = Map::new();
        let params = match &request.params {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(Error::TransportInvalidArg(
                    "Request parameters must be a JSON object".into(),
                ))
            }
        };
        let p = &self.plugin;

        match method {
            // ------------------------------------------------------------
            // Lifecycle and base
            // ------------------------------------------------------------
            Method::Startup => {
                let raw: String = arg(params, "uri")?;
                let uri = DeviceUri::parse(&raw)?;
                let password: Option<String> = opt_arg(params, "password")?;
                let timeout_ms: u32 = arg(params, "timeout_ms")?;
                p.plugin_register(&uri, password.as_deref(), timeout_ms)
                    .await?;
                Ok(Value::Null)
            }
            Method::Shutdown => {
                p.plugin_unregister().await?;
                Ok(Value::Null)
            }
            Method::TimeOutSet => {
                p.time_out_set(arg(params, "ms")?).await?;
                Ok(Value::Null)
            }
            Method::TimeOutGet => encode(&p.time_out_get().await?),
            Method::JobStatus => {
                let job_id: String = arg(params, "job_id")?;
                let (state, percent, item) = p.job_status(&job_id).await?;
                encode(&(state, percent, item))
            }
            Method::JobFree => {
                let job_id: String = arg(params, "job_id")?;
                p.job_free(&job_id).await?;
                Ok(Value::Null)
            }
            Method::Capabilities => encode(&p.capabilities(&arg(params, "system")?).await?),
            Method::PluginInfo => {
                let info = p.plugin_info().await?;
                encode(&(info.description, info.version))
            }
            Method::Pools => encode(&p.pools().await?),
            Method::Systems => encode(&p.systems().await?),

            // ------------------------------------------------------------
            // Block storage
            // ------------------------------------------------------------
            Method::Volumes => encode(&p.volumes().await?),
            Method::VolumeCreate => encode(
                &p.volume_create(
                    arg(params, "pool")?,
                    arg(params, "volume_name")?,
                    arg(params, "size_bytes")?,
                    arg(params, "provisioning")?,
                )
                .await?,
            ),
            Method::VolumeResize => encode(
                &p.volume_resize(arg(params, "volume")?, arg(params, "new_size_bytes")?)
                    .await?,
            ),
            Method::VolumeReplicate => encode(
                &p.volume_replicate(
                    opt_arg(params, "pool")?,
                    arg(params, "rep_type")?,
                    arg(params, "volume_src")?,
                    arg(params, "name")?,
                )
                .await?,
            ),
            Method::VolumeReplicateRangeBlockSize => encode(
                &p.volume_replicate_range_block_size(arg(params, "system")?)
                    .await?,
            ),
            Method::VolumeReplicateRange => encode(
                &p.volume_replicate_range(
                    arg(params, "rep_type")?,
                    arg(params, "volume_src")?,
                    arg(params, "volume_dest")?,
                    arg(params, "ranges")?,
                )
                .await?,
            ),
            Method::VolumeDelete => encode(&p.volume_delete(arg(params, "volume")?).await?),
            Method::VolumeEnable => {
                p.volume_enable(arg(params, "volume")?).await?;
                Ok(Value::Null)
            }
            Method::VolumeDisable => {
                p.volume_disable(arg(params, "volume")?).await?;
                Ok(Value::Null)
            }
            Method::VolumeMask => {
                p.volume_mask(arg(params, "access_group")?, arg(params, "volume")?)
                    .await?;
                Ok(Value::Null)
            }
            Method::VolumeUnmask => {
                p.volume_unmask(arg(params, "access_group")?, arg(params, "volume")?)
                    .await?;
                Ok(Value::Null)
            }
            Method::AccessGroups => encode(&p.access_groups().await?),
            Method::AccessGroupCreate => encode(
                &p.access_group_create(
                    arg(params, "name")?,
                    arg(params, "init_id")?,
                    arg(params, "init_type")?,
                    arg(params, "system")?,
                )
                .await?,
            ),
            Method::AccessGroupDelete => {
                p.access_group_delete(arg(params, "access_group")?).await?;
                Ok(Value::Null)
            }
            Method::AccessGroupInitiatorAdd => encode(
                &p.access_group_initiator_add(
                    arg(params, "access_group")?,
                    arg(params, "init_id")?,
                    arg(params, "init_type")?,
                )
                .await?,
            ),
            Method::AccessGroupInitiatorDelete => encode(
                &p.access_group_initiator_delete(
                    arg(params, "access_group")?,
                    arg(params, "init_id")?,
                    arg(params, "init_type")?,
                )
                .await?,
            ),
            Method::VolumesAccessibleByAccessGroup => encode(
                &p.volumes_accessible_by_access_group(arg(params, "access_group")?)
                    .await?,
            ),
            Method::AccessGroupsGrantedToVolume => encode(
                &p.access_groups_granted_to_volume(arg(params, "volume")?)
                    .await?,
            ),
            Method::VolumeChildDependency => {
                encode(&p.volume_child_dependency(arg(params, "volume")?).await?)
            }
            Method::VolumeChildDependencyRm => {
                encode(&p.volume_child_dependency_rm(arg(params, "volume")?).await?)
            }
            Method::Disks => encode(&p.disks().await?),
            Method::TargetPorts => encode(&p.target_ports().await?),
            Method::Batteries => encode(&p.batteries().await?),

            // ------------------------------------------------------------
            // File storage
            // ------------------------------------------------------------
            Method::Fs => encode(&p.fs().await?),
            Method::FsCreate => encode(
                &p.fs_create(
                    arg(params, "pool")?,
                    arg(params, "name")?,
                    arg(params, "size_bytes")?,
                )
                .await?,
            ),
            Method::FsDelete => encode(&p.fs_delete(arg(params, "fs")?).await?),
            Method::FsResize => encode(
                &p.fs_resize(arg(params, "fs")?, arg(params, "new_size_bytes")?)
                    .await?,
            ),
            Method::FsClone => encode(
                &p.fs_clone(
                    arg(params, "src_fs")?,
                    arg(params, "dest_fs_name")?,
                    opt_arg(params, "snapshot")?,
                )
                .await?,
            ),
            Method::FsFileClone => encode(
                &p.fs_file_clone(
                    arg(params, "fs")?,
                    arg(params, "src_file_name")?,
                    arg(params, "dest_file_name")?,
                    opt_arg(params, "snapshot")?,
                )
                .await?,
            ),
            Method::FsSnapshots => encode(&p.fs_snapshots(arg(params, "fs")?).await?),
            Method::FsSnapshotCreate => encode(
                &p.fs_snapshot_create(arg(params, "fs")?, arg(params, "snapshot_name")?)
                    .await?,
            ),
            Method::FsSnapshotDelete => encode(
                &p.fs_snapshot_delete(arg(params, "fs")?, arg(params, "snapshot")?)
                    .await?,
            ),
            Method::FsSnapshotRestore => encode(
                &p.fs_snapshot_restore(
                    arg(params, "fs")?,
                    arg(params, "snapshot")?,
                    arg(params, "files")?,
                    arg(params, "restore_files")?,
                    arg(params, "all_files")?,
                )
                .await?,
            ),
            Method::FsChildDependency => encode(
                &p.fs_child_dependency(arg(params, "fs")?, arg(params, "files")?)
                    .await?,
            ),
            Method::FsChildDependencyRm => encode(
                &p.fs_child_dependency_rm(arg(params, "fs")?, arg(params, "files")?)
                    .await?,
            ),
            Method::ExportAuth => encode(&p.export_auth().await?),
            Method::Exports => encode(&p.exports().await?),
            Method::ExportFs => encode(
                &p.export_fs(
                    arg(params, "fs_id")?,
                    opt_arg(params, "export_path")?,
                    arg(params, "root_list")?,
                    arg(params, "rw_list")?,
                    arg(params, "ro_list")?,
                    arg(params, "anon_uid")?,
                    arg(params, "anon_gid")?,
                    opt_arg(params, "auth_type")?,
                    opt_arg(params, "options")?,
                )
                .await?,
            ),
            Method::ExportRemove => {
                p.export_remove(arg(params, "export")?).await?;
                Ok(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::data::{JobState, Pool, System, Volume};
    use crate::plugin::{JobPoll, NasPlugin, PluginBase, PluginInfo, SanPlugin};
    use async_trait::async_trait;
    use assert_matches::assert_matches;

    struct FixedPlugin;

    #[async_trait]
    impl PluginBase for FixedPlugin {
        async fn plugin_register(
            &self,
            _uri: &DeviceUri,
            _password: Option<&str>,
            _timeout_ms: u32,
        ) -> Result<()> {
            Ok(())
        }

        async fn plugin_unregister(&self) -> Result<()> {
            Ok(())
        }

        async fn time_out_set(&self, _ms: u32) -> Result<()> {
            Ok(())
        }

        async fn time_out_get(&self) -> Result<u32> {
            Ok(30_000)
        }

        async fn job_status(&self, job_id: &str) -> Result<JobPoll> {
            if job_id == "JOB_1" {
                Ok((JobState::Complete, 100, None))
            } else {
                Err(Error::NotFoundJob(job_id.into()))
            }
        }

        async fn job_free(&self, _job_id: &str) -> Result<()> {
            Ok(())
        }

        async fn capabilities(&self, _system: &System) -> Result<Capabilities> {
            Ok(Capabilities::new())
        }

        async fn plugin_info(&self) -> Result<PluginInfo> {
            Ok(PluginInfo {
                description: "fixed".into(),
                version: "1.2.3".into(),
            })
        }

        async fn pools(&self) -> Result<Vec<Pool>> {
            Ok(vec![])
        }

        async fn systems(&self) -> Result<Vec<System>> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl SanPlugin for FixedPlugin {
        async fn volumes(&self) -> Result<Vec<Volume>> {
            Ok(vec![Volume::new(
                "V1", "vol-one", "", 512, 2048, true, "sys", "pool",
            )?])
        }
    }

    impl NasPlugin for FixedPlugin {}

    async fn start_pair() -> Transport {
        let (client, server) = UnixStream::pair().unwrap();
        let runner = PluginRunner::new(Arc::new(FixedPlugin));
        tokio::spawn(async move {
            let _ = runner.serve(server).await;
        });
        Transport::new(client)
    }

    async fn do_startup(tp: &mut Transport) {
        let result = tp
            .rpc(
                "startup",
                serde_json::json!({
                    "uri": "fixed://",
                    "password": null,
                    "timeout_ms": 30000,
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[test]
    fn test_method_names_round_trip() {
        for name in ["startup", "volume_create", "fs_snapshot_restore", "exports"] {
            let method = Method::from_name(name).unwrap();
            assert_eq!(method.name(), name);
        }
        assert_eq!(Method::from_name("volume_shred"), None);
    }

    #[tokio::test]
    async fn test_startup_then_inventory() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let volumes: Vec<Volume> =
            serde_json::from_value(tp.rpc("volumes", serde_json::json!({})).await.unwrap())
                .unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].id, "V1");
        assert_eq!(volumes[0].size_bytes(), 512 * 2048);
    }

    #[tokio::test]
    async fn test_call_before_startup_is_rejected() {
        let mut tp = start_pair().await;
        let err = tp.rpc("volumes", serde_json::json!({})).await.unwrap_err();
        assert_matches!(err, Error::TransportInvalidArg(_));
    }

    #[tokio::test]
    async fn test_unknown_method_is_no_support() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let err = tp
            .rpc("volume_shred", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NoSupport(_));
        assert_eq!(err.code(), 153);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_invalid_arg() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let err = tp.rpc("job_status", serde_json::json!({})).await.unwrap_err();
        assert_matches!(err, Error::TransportInvalidArg(_));
    }

    #[tokio::test]
    async fn test_unsupported_group_defaults_to_no_support() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let err = tp.rpc("fs", serde_json::json!({})).await.unwrap_err();
        assert_matches!(err, Error::NoSupport(_));
    }

    #[tokio::test]
    async fn test_job_status_wire_shape() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let result = tp
            .rpc("job_status", serde_json::json!({"job_id": "JOB_1"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!([2, 100, null]));

        let err = tp
            .rpc("job_status", serde_json::json!({"job_id": "JOB_9"}))
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFoundJob(_));
    }

    #[tokio::test]
    async fn test_shutdown_ends_the_session() {
        let mut tp = start_pair().await;
        do_startup(&mut tp).await;

        let result = tp.rpc("shutdown", serde_json::json!({})).await.unwrap();
        assert_eq!(result, Value::Null);

        // Past shutdown the server side is gone.
        let err = tp.rpc("volumes", serde_json::json!({})).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_teardown_runs_when_client_drops_mid_request() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        struct SlowPlugin {
            unregistered: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl PluginBase for SlowPlugin {
            async fn plugin_register(
                &self,
                _uri: &DeviceUri,
                _password: Option<&str>,
                _timeout_ms: u32,
            ) -> Result<()> {
                Ok(())
            }

            async fn plugin_unregister(&self) -> Result<()> {
                self.unregistered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            async fn time_out_set(&self, _ms: u32) -> Result<()> {
                Ok(())
            }

            async fn time_out_get(&self) -> Result<u32> {
                Ok(30_000)
            }

            async fn job_status(&self, job_id: &str) -> Result<JobPoll> {
                Err(Error::NotFoundJob(job_id.into()))
            }

            async fn job_free(&self, _job_id: &str) -> Result<()> {
                Ok(())
            }

            async fn capabilities(&self, _system: &System) -> Result<Capabilities> {
                Ok(Capabilities::new())
            }

            async fn plugin_info(&self) -> Result<PluginInfo> {
                Ok(PluginInfo {
                    description: "slow".into(),
                    version: "0.0.1".into(),
                })
            }

            async fn pools(&self) -> Result<Vec<Pool>> {
                Ok(vec![])
            }

            async fn systems(&self) -> Result<Vec<System>> {
                Ok(vec![])
            }
        }

        #[async_trait]
        impl SanPlugin for SlowPlugin {
            async fn volumes(&self) -> Result<Vec<Volume>> {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(vec![])
            }
        }

        impl NasPlugin for SlowPlugin {}

        let (client, server) = UnixStream::pair().unwrap();
        let unregistered = Arc::new(AtomicUsize::new(0));
        let runner = PluginRunner::new(Arc::new(SlowPlugin {
            unregistered: unregistered.clone(),
        }));
        let served = tokio::spawn(async move { runner.serve(server).await });

        let mut tp = Transport::new(client);
        do_startup(&mut tp).await;

        // Leave while the reply is still being prepared; the loop ends on
        // the failed write and teardown must still run.
        tp.send("volumes", serde_json::json!({})).await.unwrap();
        drop(tp);

        served.await.unwrap().unwrap();
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }
}
