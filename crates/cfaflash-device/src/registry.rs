//! Device registry and initialization
//!
//! This module opens devices by name and wraps them in a [`DeviceHandle`].

use std::collections::HashMap;

use cfaflash_core::model::ModelCatalog;

use crate::error::DeviceError;
use crate::handle::DeviceHandle;

/// Parsed device parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    /// Device backend name
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl DeviceParams {
    /// Get a parameter parsed as an integer (decimal or `0x` hex)
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, DeviceError> {
        let Some(value) = self.params.get(key) else {
            return Ok(None);
        };
        let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => value.parse(),
        };
        parsed
            .map(Some)
            .map_err(|_| DeviceError::InvalidParameter(format!("{}={}", key, value)))
    }
}

/// Parse a device string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
///
/// # Example
/// ```ignore
/// let params = parse_device_params("dummy:model=7")?;
/// assert_eq!(params.name, "dummy");
/// assert_eq!(params.params.get("model"), Some(&"7".to_string()));
/// ```
pub fn parse_device_params(s: &str) -> Result<DeviceParams, DeviceError> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(DeviceError::InvalidParameter(format!(
                    "'{}' (expected key=value)",
                    opt
                )));
            }
        }
    }

    Ok(DeviceParams {
        name: name.to_string(),
        params,
    })
}

/// Open a device and wrap it in a [`DeviceHandle`]
///
/// # Arguments
/// * `device` - Device specification (e.g., "dummy:model=7" or "tcp:host=10.0.0.2")
/// * `catalog` - Model catalog, used by emulated devices to pick their identity
pub fn open_device(device: &str, catalog: &ModelCatalog) -> Result<DeviceHandle, DeviceError> {
    let params = parse_device_params(device)?;
    #[cfg(not(feature = "dummy"))]
    let _ = catalog;

    match params.name.as_str() {
        #[cfg(feature = "dummy")]
        "dummy" => open_dummy(&params, catalog),

        #[cfg(feature = "tcp")]
        "tcp" => open_tcp(&params),

        _ => Err(DeviceError::UnknownDevice(params.name)),
    }
}

#[cfg(feature = "dummy")]
fn open_dummy(params: &DeviceParams, catalog: &ModelCatalog) -> Result<DeviceHandle, DeviceError> {
    use cfaflash_dummy::{DummyBoard, DummyConfig, FileBackedBoard};

    let model = match params.get_u32("model")? {
        Some(id) => catalog.find(id).ok_or(DeviceError::UnknownModel(id))?,
        None => catalog
            .models()
            .first()
            .ok_or(DeviceError::MissingParameter("model"))?,
    };
    log::info!("Emulating model {} ({})", model.id, model.name);

    let mut config = DummyConfig::for_model(model);
    if let Some(polls) = params.get_u32("busy")? {
        config = config.with_busy_polls(polls);
    }

    match params.params.get("file") {
        Some(path) => {
            let board = FileBackedBoard::open(config, std::path::Path::new(path))?;
            Ok(DeviceHandle::new(Box::new(board), "dummy"))
        }
        None => Ok(DeviceHandle::new(Box::new(DummyBoard::new(config)), "dummy")),
    }
}

#[cfg(feature = "tcp")]
fn open_tcp(params: &DeviceParams) -> Result<DeviceHandle, DeviceError> {
    let host = params
        .params
        .get("host")
        .ok_or(DeviceError::MissingParameter("host"))?;
    let port = match params.get_u32("port")? {
        Some(port) => u16::try_from(port)
            .map_err(|_| DeviceError::InvalidParameter(format!("port={}", port)))?,
        None => crate::tcp::DEFAULT_PORT,
    };

    let bridge = crate::tcp::TcpBridge::connect(host, port)?;
    Ok(DeviceHandle::new(Box::new(bridge), "tcp"))
}

// Device information and listing
/// Information about a device backend
pub struct DeviceInfo {
    /// Name used in device strings
    pub name: &'static str,
    /// Short description
    pub description: &'static str,
}

/// Get information about all available device backends (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    #[cfg(feature = "dummy")]
    devices.push(DeviceInfo {
        name: "dummy",
        description: "Emulated board (model=<id>, file=<image>, busy=<polls>)",
    });

    #[cfg(feature = "tcp")]
    devices.push(DeviceInfo {
        name: "tcp",
        description: "Register bridge over TCP (host=<addr>, port=<port>)",
    });

    devices
}

/// Generate a short list of device names for CLI help
pub fn device_names_short() -> String {
    let devices = available_devices();
    if devices.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let names: Vec<&str> = devices.iter().map(|d| d.name).collect();
    names.join(", ")
}
