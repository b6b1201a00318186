//! Mounting a provider through the host driver.
//!
//! The driver itself lives outside of this crate. It is reached
//! through [Driver], which creates one [DriverBinding] per mount.

use crate::dispatch::{DispatchOptions, Dispatcher, FileSystemInterface};
use crate::provider::FileSystem;
use std::sync::Arc;
use userfs_types::{DeviceClass, NtStatus, SecurityDescriptor, VolumeParams};

/// Entry point of the host driver.
pub trait Driver: Send + Sync {
    type Binding: DriverBinding;

    /// Check that a volume of the given class could be mounted at
    /// `mount_point`, without mounting anything.
    fn preflight(&self, device_class: DeviceClass, mount_point: Option<&str>)
    -> Result<(), NtStatus>;

    /// Register a volume. Operations on the volume are sent to
    /// `interface` once the dispatcher is started.
    fn create(
        &self,
        device_class: DeviceClass,
        params: &VolumeParams,
        interface: Arc<dyn FileSystemInterface>,
    ) -> Result<Self::Binding, NtStatus>;
}

/// A volume registered with the driver.
///
/// Dropping the binding deletes the volume.
pub trait DriverBinding: Send {
    fn set_debug_log(&mut self, flags: u32);

    /// Attach the volume. `None` lets the driver choose.
    fn set_mount_point(
        &mut self,
        mount_point: Option<&str>,
        security: Option<&SecurityDescriptor>,
    ) -> Result<(), NtStatus>;

    fn mount_point(&self) -> Option<&str>;

    /// Start dispatching operations, using `threads` worker threads or
    /// a driver default if 0.
    fn start_dispatcher(&mut self, threads: u32) -> Result<(), NtStatus>;

    /// Stop dispatching. Operations already running are allowed to
    /// finish.
    fn stop_dispatcher(&mut self);
}

/// A provider and its volume parameters, mounted or not.
pub struct Volume<D: Driver, P: FileSystem + ?Sized + 'static> {
    driver: D,
    provider: Arc<P>,
    params: VolumeParams,
    binding: Option<D::Binding>,
}

impl<D: Driver, P: FileSystem + ?Sized + 'static> Volume<D, P> {
    pub fn new(driver: D, provider: Arc<P>) -> Self {
        Self {
            driver,
            provider,
            params: VolumeParams::default(),
            binding: None,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    /// Access volume parameters for modification.
    ///
    /// Fails with [NtStatus::INVALID_DEVICE_STATE] while mounted.
    pub fn params_mut(&mut self) -> Result<&mut VolumeParams, NtStatus> {
        if self.binding.is_some() {
            return Err(NtStatus::INVALID_DEVICE_STATE);
        }

        Ok(&mut self.params)
    }

    pub fn set_params(&mut self, params: VolumeParams) -> Result<(), NtStatus> {
        *self.params_mut()? = params;

        Ok(())
    }

    pub fn preflight(&self, mount_point: Option<&str>) -> Result<(), NtStatus> {
        self.driver
            .preflight(self.params.device_class(), mount_point)
    }

    /// Mount the volume and start dispatching operations to the
    /// provider.
    ///
    /// On failure, nothing stays registered with the driver.
    pub fn mount(
        &mut self,
        mount_point: Option<&str>,
        security: Option<&SecurityDescriptor>,
        options: DispatchOptions,
    ) -> Result<(), NtStatus> {
        if self.binding.is_some() {
            return Err(NtStatus::INVALID_DEVICE_STATE);
        }
        let dispatcher = Dispatcher::new(Arc::clone(&self.provider), options);
        let binding = self.driver.create(
            self.params.device_class(),
            &self.params,
            Arc::new(dispatcher),
        )?;
        let mut binding = scopeguard::guard(binding, |_| {
            log::debug!("mount at {mount_point:?} failed; deleting volume");
        });
        binding.set_debug_log(options.debug_flags.0);
        binding.set_mount_point(mount_point, security)?;
        binding.start_dispatcher(options.threads)?;
        let binding = scopeguard::ScopeGuard::into_inner(binding);
        log::info!(
            "mounted {:?} volume at {:?}, {:?} guard",
            self.params.device_class(),
            binding.mount_point(),
            options.guard
        );
        self.binding = Some(binding);

        Ok(())
    }

    /// Stop dispatching and delete the volume. Does nothing if not
    /// mounted.
    pub fn unmount(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            binding.stop_dispatcher();
            log::info!("unmounted volume at {:?}", binding.mount_point());
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.binding.is_some()
    }

    /// Where the volume is mounted, `None` if it isn't.
    pub fn mount_point(&self) -> Option<&str> {
        self.binding.as_ref().and_then(|b| b.mount_point())
    }
}

impl<D: Driver, P: FileSystem + ?Sized + 'static> Drop for Volume<D, P> {
    fn drop(&mut self) {
        self.unmount();
    }
}
