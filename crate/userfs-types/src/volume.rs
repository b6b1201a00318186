use crate::time::FileTime;
use crate::wire::truncate_utf16;
use serde::{Deserialize, Deserializer};

/// Device a volume is registered under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum DeviceClass {
    Disk,
    Net,
}

/// Volume parameters, set before mounting and fixed afterwards.
///
/// String fields are bounded; setters silently truncate values that
/// are too long, on a character boundary.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub max_component_length: u16,
    pub volume_creation_time: FileTime,
    pub volume_serial_number: u32,

    /// Time, in milliseconds, the host may cache file information.
    pub file_info_timeout: u32,

    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
    pub persistent_acls: bool,
    pub reparse_points: bool,
    pub reparse_points_access_check: bool,
    pub named_streams: bool,
    pub post_cleanup_when_modified_only: bool,
    pub pass_query_directory_pattern: bool,

    #[serde(deserialize_with = "label")]
    volume_label: String,

    #[serde(deserialize_with = "prefix")]
    prefix: String,

    #[serde(deserialize_with = "file_system_name")]
    file_system_name: String,
}

impl Default for VolumeParams {
    fn default() -> Self {
        VolumeParams {
            sector_size: 4096,
            sectors_per_allocation_unit: 1,
            max_component_length: 255,
            volume_creation_time: FileTime::UNSET,
            volume_serial_number: 0,
            file_info_timeout: 1000,
            case_sensitive_search: false,
            case_preserved_names: true,
            unicode_on_disk: true,
            persistent_acls: false,
            reparse_points: false,
            reparse_points_access_check: false,
            named_streams: false,
            post_cleanup_when_modified_only: false,
            pass_query_directory_pattern: false,
            volume_label: String::new(),
            prefix: String::new(),
            file_system_name: String::new(),
        }
    }
}

impl VolumeParams {
    /// Maximum length of the network prefix, in UTF-16 code units.
    pub const PREFIX_MAX: usize = 191;

    /// Maximum length of the filesystem name, in UTF-16 code units.
    pub const FILE_SYSTEM_NAME_MAX: usize = 15;

    /// Maximum length of the volume label, in UTF-16 code units.
    pub const VOLUME_LABEL_MAX: usize = 32;

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set the network prefix, for example `\server\share`.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = truncate_utf16(prefix, Self::PREFIX_MAX);
    }

    pub fn file_system_name(&self) -> &str {
        &self.file_system_name
    }

    pub fn set_file_system_name(&mut self, name: &str) {
        self.file_system_name = truncate_utf16(name, Self::FILE_SYSTEM_NAME_MAX);
    }

    /// Initial label of the volume.
    pub fn volume_label(&self) -> &str {
        &self.volume_label
    }

    pub fn set_volume_label(&mut self, label: &str) {
        self.volume_label = truncate_utf16(label, Self::VOLUME_LABEL_MAX);
    }

    /// Contexts are always transported as two full words.
    pub fn um_file_context_is_full_context(&self) -> bool {
        true
    }

    /// A volume with a prefix is a network volume.
    pub fn device_class(&self) -> DeviceClass {
        if self.prefix.is_empty() {
            DeviceClass::Disk
        } else {
            DeviceClass::Net
        }
    }
}

fn label<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(truncate_utf16(&String::deserialize(d)?, VolumeParams::VOLUME_LABEL_MAX))
}

fn prefix<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(truncate_utf16(&String::deserialize(d)?, VolumeParams::PREFIX_MAX))
}

fn file_system_name<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(truncate_utf16(
        &String::deserialize(d)?,
        VolumeParams::FILE_SYSTEM_NAME_MAX,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_class_follows_prefix() {
        let mut params = VolumeParams::default();
        assert_eq!(DeviceClass::Disk, params.device_class());

        params.set_prefix("\\server\\share");
        assert_eq!(DeviceClass::Net, params.device_class());

        params.set_prefix("");
        assert_eq!(DeviceClass::Disk, params.device_class());
    }

    #[test]
    fn names_are_truncated() {
        let mut params = VolumeParams::default();
        params.set_file_system_name("a-very-long-filesystem-name");
        assert_eq!("a-very-long-fil", params.file_system_name());

        params.set_prefix(&"p".repeat(300));
        assert_eq!(VolumeParams::PREFIX_MAX, params.prefix().len());

        params.set_volume_label(&"\u{e9}".repeat(40));
        assert_eq!(32, params.volume_label().chars().count());
    }

    #[test]
    fn full_context() {
        assert!(VolumeParams::default().um_file_context_is_full_context());
    }
}
