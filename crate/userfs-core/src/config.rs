use crate::dispatch::{DebugFlags, DispatchOptions, GuardStrategy};
use crate::host::{Driver, Volume};
use crate::provider::FileSystem;
use crate::reparse::DEFAULT_MAX_REPARSE_HOPS;
use anyhow::Context as _;
use std::path::Path;
use userfs_types::VolumeParams;

/// How and where to mount a volume.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct MountConfig {
    /// Where to mount. If unset, the driver chooses.
    pub mount_point: Option<String>,

    pub guard: GuardStrategy,
    pub debug_flags: DebugFlags,
    pub max_reparse_hops: u32,

    /// Worker threads of the dispatcher, 0 for the driver default.
    pub dispatcher_threads: u32,

    pub volume: VolumeParams,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mount_point: None,
            guard: GuardStrategy::default(),
            debug_flags: DebugFlags::NONE,
            max_reparse_hops: DEFAULT_MAX_REPARSE_HOPS,
            dispatcher_threads: 0,
            volume: VolumeParams::default(),
        }
    }
}

impl MountConfig {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            guard: self.guard,
            debug_flags: self.debug_flags,
            max_reparse_hops: self.max_reparse_hops,
            threads: self.dispatcher_threads,
        }
    }

    /// Set the volume parameters of `volume` and mount it.
    pub fn mount<D, P>(&self, volume: &mut Volume<D, P>) -> anyhow::Result<()>
    where
        D: Driver,
        P: FileSystem + ?Sized + 'static,
    {
        volume
            .set_params(self.volume.clone())
            .map_err(|status| anyhow::anyhow!("volume is already mounted: {status}"))?;
        let mount_point = self.mount_point.as_deref();
        volume
            .preflight(mount_point)
            .map_err(|status| anyhow::anyhow!("cannot mount at {mount_point:?}: {status}"))?;
        volume
            .mount(mount_point, None, self.dispatch_options())
            .map_err(|status| anyhow::anyhow!("mount at {mount_point:?} failed: {status}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use userfs_types::DeviceClass;

    #[test]
    fn parse_config() -> anyhow::Result<()> {
        let config = MountConfig::parse(
            r#"
            mount_point = "X:"
            guard = "coarse"
            debug_flags = 256
            max_reparse_hops = 8

            [volume]
            sector_size = 512
            case_sensitive_search = true
            reparse_points = true
            prefix = "\\server\\share"
            file_system_name = "memfs-with-a-long-name"
            "#,
        )?;

        assert_eq!(Some("X:"), config.mount_point.as_deref());
        assert_eq!(GuardStrategy::Coarse, config.guard);
        assert_eq!(DebugFlags(256), config.debug_flags);
        assert_eq!(8, config.max_reparse_hops);
        assert_eq!(0, config.dispatcher_threads);
        assert_eq!(512, config.volume.sector_size);
        assert!(config.volume.case_sensitive_search);
        assert!(config.volume.reparse_points);
        assert_eq!(255, config.volume.max_component_length);
        assert_eq!("\\server\\share", config.volume.prefix());
        assert_eq!(DeviceClass::Net, config.volume.device_class());
        assert_eq!("memfs-with-a-lo", config.volume.file_system_name());

        Ok(())
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let config = MountConfig::parse("")?;
        assert_eq!(MountConfig::default(), config);
        assert_eq!(GuardStrategy::Fine, config.guard);
        assert_eq!(4096, config.volume.sector_size);
        assert_eq!(1000, config.volume.file_info_timeout);
        assert!(config.volume.case_preserved_names);
        assert!(config.volume.unicode_on_disk);
        assert_eq!(DeviceClass::Disk, config.volume.device_class());
        assert_eq!(DEFAULT_MAX_REPARSE_HOPS, config.dispatch_options().max_reparse_hops);

        Ok(())
    }

    #[test]
    fn bad_guard() {
        assert!(MountConfig::parse(r#"guard = "medium""#).is_err());
    }

    #[test]
    fn from_file() -> anyhow::Result<()> {
        let tempdir = tempfile::TempDir::new()?;
        let path = tempdir.path().join("mount.toml");
        std::fs::write(&path, "mount_point = \"M:\"\n")?;

        let config = MountConfig::from_file(&path)?;
        assert_eq!(Some("M:"), config.mount_point.as_deref());

        let missing = MountConfig::from_file(&tempdir.path().join("missing.toml"));
        assert!(missing.is_err());

        Ok(())
    }
}
