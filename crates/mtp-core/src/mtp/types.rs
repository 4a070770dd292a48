//! MTP value types shared between the transport seam and the session layer.
//!
//! Everything here is plain data: descriptors produced by the transport and
//! snapshots handed back to callers. They serialize to camelCase JSON for the
//! probe binary and for fixtures.

use serde::{Deserialize, Serialize};

/// Object id on a device. Unique within the device, not across devices.
pub type ObjectId = u32;

/// Storage id. Unique within a device session only.
pub type StorageId = u32;

/// Reserved object id for the synthetic storage root. Never a real device object.
pub const ROOT_OBJECT_ID: ObjectId = 0;

/// Name given to the synthetic root directory of a storage.
pub const ROOT_NAME: &str = "Root";

/// Identity of a device as reported by discovery, before any session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeviceDescriptor {
    pub bus: u8,
    pub address: u8,
    /// For example, 0x18d1 for Google.
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Serial number hint from the USB descriptor, if the platform exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_hint: Option<String>,
    /// BCD-ish protocol version: high byte is major, low byte is minor.
    #[serde(default)]
    pub device_version: u16,
}

impl RawDeviceDescriptor {
    /// Stable id for the device on its current USB port.
    ///
    /// Format: "mtp-{bus}-{address}".
    pub fn device_id(&self) -> String {
        format!("mtp-{}-{}", self.bus, self.address)
    }

    /// Returns a display name for the device.
    ///
    /// Prefers the product name, falls back to "{vendor} device", then "MTP device (vendor:product)".
    pub fn display_name(&self) -> String {
        if let Some(product) = &self.product {
            return product.clone();
        }
        if let Some(vendor) = &self.vendor {
            return format!("{} device", vendor);
        }
        format!("MTP device ({:04x}:{:04x})", self.vendor_id, self.product_id)
    }
}

/// Parses a device ID back into bus and address.
///
/// Format: "mtp-{bus}-{address}"
pub fn parse_device_id(device_id: &str) -> Option<(u8, u8)> {
    let rest = device_id.strip_prefix("mtp-")?;
    let (bus, address) = rest.split_once('-')?;
    Some((bus.parse().ok()?, address.parse().ok()?))
}

/// Storage partition as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDescriptor {
    pub id: StorageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// In bytes.
    pub max_capacity: u64,
    /// In bytes.
    pub free_space: u64,
    /// For example, "FixedRAM", "RemovableRAM".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

/// Kind flag the transport attaches to every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    File,
    Folder,
}

/// Metadata of one object as returned by a listing or a metadata fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub storage_id: StorageId,
    pub name: String,
    /// In bytes. Zero for folders.
    pub size: u64,
    pub kind: ObjectKind,
    /// Unix timestamp in seconds, when the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

impl ObjectDescriptor {
    pub fn is_folder(&self) -> bool {
        self.kind == ObjectKind::Folder
    }
}

/// Identity strings a session can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityField {
    FriendlyName,
    Manufacturer,
    Model,
    SerialNumber,
    FirmwareVersion,
}

impl IdentityField {
    /// Text shown when the device does not report this field.
    pub fn fallback(self) -> &'static str {
        match self {
            Self::FriendlyName => "Unknown Device",
            Self::Manufacturer => "Unknown Manufacturer",
            Self::Model => "Unknown Model",
            Self::SerialNumber => "Unknown Serial",
            Self::FirmwareVersion => "Unknown Version",
        }
    }
}

/// Snapshot of one storage, taken when the storage list was last refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub id: StorageId,
    /// For example, "Internal shared storage".
    pub description: String,
    /// In bytes.
    pub max_capacity: u64,
    /// In bytes.
    pub free_space: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    pub is_read_only: bool,
}

/// Information about an open device session, including its storages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    pub display_name: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub mtp_version: String,
    pub storages: Vec<StorageInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(vendor: Option<&str>, product: Option<&str>) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            bus: 1,
            address: 5,
            vendor_id: 0x18d1,
            product_id: 0x4ee1,
            vendor: vendor.map(str::to_string),
            product: product.map(str::to_string),
            serial_hint: None,
            device_version: 0x0100,
        }
    }

    #[test]
    fn test_display_name_with_product() {
        assert_eq!(descriptor(Some("Google"), Some("Pixel 8")).display_name(), "Pixel 8");
    }

    #[test]
    fn test_display_name_with_vendor() {
        assert_eq!(descriptor(Some("Samsung"), None).display_name(), "Samsung device");
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(descriptor(None, None).display_name(), "MTP device (18d1:4ee1)");
    }

    #[test]
    fn test_device_id_round_trip() {
        let desc = descriptor(None, None);
        assert_eq!(desc.device_id(), "mtp-1-5");
        assert_eq!(parse_device_id(&desc.device_id()), Some((1, 5)));
    }

    #[test]
    fn test_parse_device_id_invalid() {
        assert_eq!(parse_device_id("mtp-1"), None);
        assert_eq!(parse_device_id("usb-1-5"), None);
        assert_eq!(parse_device_id("mtp-abc-5"), None);
        assert_eq!(parse_device_id("mtp-1-300"), None);
        assert_eq!(parse_device_id("MTP-1-5"), None);
        assert_eq!(parse_device_id(""), None);
    }

    #[test]
    fn test_identity_fallbacks() {
        assert_eq!(IdentityField::FriendlyName.fallback(), "Unknown Device");
        assert_eq!(IdentityField::SerialNumber.fallback(), "Unknown Serial");
        assert_eq!(IdentityField::FirmwareVersion.fallback(), "Unknown Version");
    }

    #[test]
    fn test_descriptor_serialization() {
        let json = serde_json::to_string(&descriptor(Some("Google"), None)).unwrap();
        assert!(json.contains("\"vendorId\":"));
        assert!(json.contains("\"deviceVersion\":256"));
        // serialHint should be omitted when None
        assert!(!json.contains("serialHint"));
    }

    #[test]
    fn test_object_kind_serialization() {
        assert_eq!(serde_json::to_string(&ObjectKind::Folder).unwrap(), "\"folder\"");
        let parsed: ObjectKind = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(parsed, ObjectKind::File);
    }

    #[test]
    fn test_storage_info_serialization() {
        let info = StorageInfo {
            id: 0x10001,
            description: "Internal Storage".to_string(),
            max_capacity: 128_000_000_000,
            free_space: 64_000_000_000,
            storage_type: Some("FixedRAM".to_string()),
            is_read_only: false,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"maxCapacity\":128000000000"));
        assert!(json.contains("\"freeSpace\":64000000000"));
        assert!(json.contains("\"isReadOnly\":false"));
    }
}
