//! Error types for the plugin RPC framework
//!
//! A closed taxonomy shared by the client, the dispatcher and the data-model
//! codec. Every error carries a stable numeric code so it can cross the
//! process boundary and be rebuilt on the other side; backend-native
//! failures never travel unwrapped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for client, dispatcher and codec
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Library bug: {0}")]
    LibBug(String),

    #[error("Plugin bug: {0}")]
    PluginBug(String),

    #[error("Operation timed out: {0}")]
    TimedOut(String),

    #[error("The arraybridge daemon is not running: {0}")]
    DaemonNotRunning(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // =========================================================================
    // Argument Errors
    // =========================================================================
    #[error("Name conflict: {0}")]
    NameConflict(String),

    #[error("Initiator already exists: {0}")]
    ExistsInitiator(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No state change: {0}")]
    NoStateChange(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    #[error("Connection refused: {0}")]
    NetworkConnRefused(String),

    #[error("Host down: {0}")]
    NetworkHostDown(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    // =========================================================================
    // Support Errors
    // =========================================================================
    #[error("Out of memory: {0}")]
    NoMemory(String),

    #[error("Unsupported operation: {0}")]
    NoSupport(String),

    #[error("Not licensed: {0}")]
    NotLicensed(String),

    // =========================================================================
    // Masking / Dependency Errors
    // =========================================================================
    #[error("Volume is masked to an access group: {0}")]
    IsMasked(String),

    #[error("Refusing to remove the last initiator: {0}")]
    LastInitInAccessGroup(String),

    #[error("Access group has no initiators: {0}")]
    EmptyAccessGroup(String),

    #[error("Has child dependency: {0}")]
    HasChildDependency(String),

    // =========================================================================
    // Not-Found Errors
    // =========================================================================
    #[error("Access group not found: {0}")]
    NotFoundAccessGroup(String),

    #[error("File system not found: {0}")]
    NotFoundFs(String),

    #[error("Job not found: {0}")]
    NotFoundJob(String),

    #[error("Pool not found: {0}")]
    NotFoundPool(String),

    #[error("File system snapshot not found: {0}")]
    NotFoundFsSnapshot(String),

    #[error("Volume not found: {0}")]
    NotFoundVolume(String),

    #[error("NFS export not found: {0}")]
    NotFoundNfsExport(String),

    #[error("System not found: {0}")]
    NotFoundSystem(String),

    #[error("Disk not found: {0}")]
    NotFoundDisk(String),

    // =========================================================================
    // Plugin Lifecycle Errors
    // =========================================================================
    #[error("Plugin authentication failed: {0}")]
    PluginAuthFailed(String),

    #[error("Plugin IPC failure: {0}")]
    PluginIpcFail(String),

    #[error("Incorrect permission on IPC socket: {0}")]
    PluginSocketPermission(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("Not enough space: {0}")]
    NotEnoughSpace(String),

    #[error("Pool is not ready: {0}")]
    PoolNotReady(String),

    #[error("Disk is not free: {0}")]
    DiskNotFree(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("Transport communication error: {0}")]
    TransportCommunication(String),

    #[error("Transport serialization error: {0}")]
    TransportSerialization(String),

    #[error("Invalid argument at the wire level: {0}")]
    TransportInvalidArg(String),

    // =========================================================================
    // Search Errors
    // =========================================================================
    /// Kept for wire-code parity with peers that filter inventories by
    /// `search_key`/`search_value`; no operation here raises it.
    #[error("Unsupported search key: {0}")]
    UnsupportedSearchKey(String),
}

impl Error {
    /// Stable numeric code carried on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Error::LibBug(_) => 1,
            Error::PluginBug(_) => 2,
            Error::TimedOut(_) => 11,
            Error::DaemonNotRunning(_) => 12,
            Error::PermissionDenied(_) => 13,
            Error::NameConflict(_) => 50,
            Error::ExistsInitiator(_) => 52,
            Error::InvalidArgument(_) => 101,
            Error::NoStateChange(_) => 125,
            Error::NetworkConnRefused(_) => 140,
            Error::NetworkHostDown(_) => 141,
            Error::NetworkError(_) => 142,
            Error::NoMemory(_) => 152,
            Error::NoSupport(_) => 153,
            Error::IsMasked(_) => 160,
            Error::NotFoundAccessGroup(_) => 200,
            Error::NotFoundFs(_) => 201,
            Error::NotFoundJob(_) => 202,
            Error::NotFoundPool(_) => 203,
            Error::NotFoundFsSnapshot(_) => 204,
            Error::NotFoundVolume(_) => 205,
            Error::NotFoundNfsExport(_) => 206,
            Error::NotFoundSystem(_) => 208,
            Error::NotFoundDisk(_) => 209,
            Error::NotLicensed(_) => 226,
            Error::PluginAuthFailed(_) => 300,
            Error::PluginIpcFail(_) => 301,
            Error::PluginSocketPermission(_) => 307,
            Error::PluginNotFound(_) => 311,
            Error::NotEnoughSpace(_) => 350,
            Error::TransportCommunication(_) => 400,
            Error::TransportSerialization(_) => 401,
            Error::TransportInvalidArg(_) => 402,
            Error::LastInitInAccessGroup(_) => 502,
            Error::UnsupportedSearchKey(_) => 510,
            Error::EmptyAccessGroup(_) => 511,
            Error::PoolNotReady(_) => 512,
            Error::DiskNotFree(_) => 513,
            Error::HasChildDependency(_) => 514,
        }
    }

    /// Check if this error is worth retrying after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TimedOut(_)
                | Error::NetworkConnRefused(_)
                | Error::NetworkHostDown(_)
                | Error::NetworkError(_)
                | Error::PluginIpcFail(_)
                | Error::PoolNotReady(_)
        )
    }

    /// True for errors raised before the plugin was ever reached
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::DaemonNotRunning(_)
                | Error::PluginIpcFail(_)
                | Error::PluginSocketPermission(_)
                | Error::PluginNotFound(_)
                | Error::TransportCommunication(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::TransportSerialization(e.to_string())
    }
}

/// Wire carrier for a structured error: `{code, message, data}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&Error> for ErrorInfo {
    fn from(e: &Error) -> Self {
        ErrorInfo::new(e.code(), e.to_string())
    }
}

impl From<Error> for ErrorInfo {
    fn from(e: Error) -> Self {
        ErrorInfo::from(&e)
    }
}

impl From<ErrorInfo> for Error {
    fn from(info: ErrorInfo) -> Self {
        let msg = info.message;
        match info.code {
            1 => Error::LibBug(msg),
            2 => Error::PluginBug(msg),
            11 => Error::TimedOut(msg),
            12 => Error::DaemonNotRunning(msg),
            13 => Error::PermissionDenied(msg),
            50 => Error::NameConflict(msg),
            52 => Error::ExistsInitiator(msg),
            101 => Error::InvalidArgument(msg),
            125 => Error::NoStateChange(msg),
            140 => Error::NetworkConnRefused(msg),
            141 => Error::NetworkHostDown(msg),
            142 => Error::NetworkError(msg),
            152 => Error::NoMemory(msg),
            153 => Error::NoSupport(msg),
            160 => Error::IsMasked(msg),
            200 => Error::NotFoundAccessGroup(msg),
            201 => Error::NotFoundFs(msg),
            202 => Error::NotFoundJob(msg),
            203 => Error::NotFoundPool(msg),
            204 => Error::NotFoundFsSnapshot(msg),
            205 => Error::NotFoundVolume(msg),
            206 => Error::NotFoundNfsExport(msg),
            208 => Error::NotFoundSystem(msg),
            209 => Error::NotFoundDisk(msg),
            226 => Error::NotLicensed(msg),
            300 => Error::PluginAuthFailed(msg),
            301 => Error::PluginIpcFail(msg),
            307 => Error::PluginSocketPermission(msg),
            311 => Error::PluginNotFound(msg),
            350 => Error::NotEnoughSpace(msg),
            400 => Error::TransportCommunication(msg),
            401 => Error::TransportSerialization(msg),
            402 => Error::TransportInvalidArg(msg),
            502 => Error::LastInitInAccessGroup(msg),
            510 => Error::UnsupportedSearchKey(msg),
            511 => Error::EmptyAccessGroup(msg),
            512 => Error::PoolNotReady(msg),
            513 => Error::DiskNotFree(msg),
            514 => Error::HasChildDependency(msg),
            // Unmapped vendor codes fall through to a generic plugin error
            // carrying the original code.
            other => Error::PluginBug(format!("{msg} (vendor code {other})")),
        }
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_code_round_trip() {
        let cases = [
            Error::NoSupport("x".into()),
            Error::NotFoundJob("j".into()),
            Error::NotFoundVolume("v".into()),
            Error::HasChildDependency("c".into()),
            Error::TransportSerialization("bad json".into()),
        ];
        for e in cases {
            let info = ErrorInfo::from(&e);
            let back = Error::from(info);
            assert_eq!(back.code(), e.code());
        }
    }

    #[test]
    fn test_unknown_vendor_code_maps_to_plugin_bug() {
        let info = ErrorInfo::new(9999, "vendor went sideways");
        let e = Error::from(info);
        assert_matches!(e, Error::PluginBug(_));
        assert!(e.to_string().contains("9999"));
    }

    #[test]
    fn test_error_info_wire_shape() {
        let info = ErrorInfo::new(153, "Unsupported operation")
            .with_data(serde_json::json!({"method": "volume_create"}));
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["code"], 153);
        assert_eq!(v["message"], "Unsupported operation");
        assert_eq!(v["data"]["method"], "volume_create");

        // data is omitted entirely when absent
        let bare = serde_json::to_value(ErrorInfo::new(1, "x")).unwrap();
        assert!(bare.get("data").is_none());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::NetworkConnRefused("refused".into()).is_retryable());
        assert!(!Error::InvalidArgument("bad".into()).is_retryable());
        assert!(Error::PluginNotFound("sim".into()).is_connectivity());
        assert!(!Error::NoSupport("op".into()).is_connectivity());
    }
}
