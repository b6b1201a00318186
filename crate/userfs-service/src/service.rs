//! Running a filesystem as a long-lived service.
//!
//! A [Service] calls [ServiceHandler::on_start], which usually mounts
//! one or more volumes, then waits until it is asked to stop, calls
//! [ServiceHandler::on_stop] and returns an exit code.

use crate::logging::{self, EventSeverity};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use userfs_core::{FsResult, fault};
use userfs_types::NtStatus;

/// Lifecycle state of a [Service].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,

    /// Construction failed. The service can't run.
    CreationFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("the service cannot be created (Status={0})")]
    CreationFailed(NtStatus),

    #[error("the service cannot run while {0:?}")]
    InvalidState(ServiceState),

    #[error("the service has failed to start (Status={0})")]
    StartFailed(NtStatus),
}

impl ServiceError {
    pub fn status(&self) -> NtStatus {
        match self {
            ServiceError::CreationFailed(status) => *status,
            ServiceError::InvalidState(_) => NtStatus::INVALID_DEVICE_STATE,
            ServiceError::StartFailed(status) => *status,
        }
    }

    /// Process exit code reporting this error.
    pub fn exit_code(&self) -> u32 {
        self.status().to_win32()
    }
}

/// What a service does when it starts and stops.
#[allow(unused_variables)]
pub trait ServiceHandler: Send {
    /// Status reported when a callback panics.
    fn fault_status(&self) -> NtStatus {
        NtStatus::SERVICE_FAULT
    }

    /// Called once, before the service starts waiting. `args` are the
    /// arguments the service was run with.
    ///
    /// Failing here ends the run.
    fn on_start(&mut self, control: &ServiceControl, args: &[String]) -> FsResult<()> {
        Ok(())
    }

    /// Called once the service has been asked to stop.
    fn on_stop(&mut self, control: &ServiceControl) -> FsResult<()> {
        Ok(())
    }
}

/// Handle for controlling a [Service] from other threads or from its
/// handler.
#[derive(Clone)]
pub struct ServiceControl {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    state: Mutex<ServiceState>,
    exit_code: AtomicU32,
    shutdown: CancellationToken,
}

impl ServiceControl {
    fn new(name: &str, state: ServiceState) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                state: Mutex::new(state),
                exit_code: AtomicU32::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ServiceState {
        *self.shared.state.lock()
    }

    fn set_state(&self, state: ServiceState) {
        let mut current = self.shared.state.lock();
        log::debug!("{}: {:?} -> {state:?}", self.shared.name, *current);
        *current = state;
    }

    /// Ask the service to stop.
    ///
    /// Can be called any number of times, in any state. A service
    /// asked to stop before it runs stops as soon as it has started.
    pub fn stop(&self) {
        if self.state() == ServiceState::CreationFailed {
            return;
        }
        if !self.shared.shutdown.is_cancelled() {
            log::debug!("{}: stop requested", self.shared.name);
        }
        self.shared.shutdown.cancel();
    }

    pub fn exit_code(&self) -> u32 {
        self.shared.exit_code.load(Ordering::Relaxed)
    }

    /// Set the code [Service::run] returns after a normal stop.
    pub fn set_exit_code(&self, exit_code: u32) {
        self.shared.exit_code.store(exit_code, Ordering::Relaxed);
    }
}

/// A service, driving a [ServiceHandler].
pub struct Service<H: ServiceHandler> {
    handler: H,
    control: ServiceControl,
    runtime: Option<Runtime>,
    creation_status: NtStatus,
    console_mode: bool,
}

impl<H: ServiceHandler> Service<H> {
    /// Create a service called `name`.
    ///
    /// Construction fails on an empty name or if the event loop can't
    /// be built. Such a failure isn't reported here; it's kept and
    /// reported by every call to [Service::run].
    pub fn new(name: &str, handler: H) -> Self {
        let runtime = if name.is_empty() {
            Err(NtStatus::INVALID_PARAMETER)
        } else {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    log::debug!("{name}: cannot build event loop: {err}");

                    NtStatus::INSUFFICIENT_RESOURCES
                })
        };
        let (runtime, creation_status, state) = match runtime {
            Ok(rt) => (Some(rt), NtStatus::SUCCESS, ServiceState::Created),
            Err(status) => (None, status, ServiceState::CreationFailed),
        };

        Self {
            handler,
            control: ServiceControl::new(name, state),
            runtime,
            creation_status,
            console_mode: true,
        }
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    pub fn state(&self) -> ServiceState {
        self.control.state()
    }

    /// Status of the construction, success unless the state is
    /// [ServiceState::CreationFailed].
    pub fn creation_status(&self) -> NtStatus {
        self.creation_status
    }

    pub fn control(&self) -> ServiceControl {
        self.control.clone()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Whether an interrupt from the console (Ctrl-C) stops the
    /// service. Enabled by default.
    pub fn set_console_mode(&mut self, console_mode: bool) {
        self.console_mode = console_mode;
    }

    /// Ask the service to stop. See [ServiceControl::stop].
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Report a service event.
    pub fn log(severity: EventSeverity, message: &str) {
        logging::log_event(severity, message);
    }

    /// Run the service until it is stopped and return the process
    /// exit code.
    ///
    /// Failures are logged and reported as a Win32 error code.
    pub fn run(&mut self, args: &[String]) -> u32 {
        match self.try_run(args) {
            Ok(exit_code) => exit_code,
            Err(err @ ServiceError::CreationFailed(_)) => {
                Self::log(EventSeverity::Error, &format!("{err}"));

                err.exit_code()
            }
            Err(err) => {
                Self::log(
                    EventSeverity::Error,
                    &format!(
                        "The service {} has failed to run (Status={})",
                        self.name(),
                        err.status()
                    ),
                );

                err.exit_code()
            }
        }
    }

    /// Run the service until it is stopped.
    ///
    /// Returns the exit code set through [ServiceControl::set_exit_code],
    /// 0 by default.
    pub fn try_run(&mut self, args: &[String]) -> Result<u32, ServiceError> {
        let state = self.control.state();
        match state {
            ServiceState::Created => {}
            ServiceState::CreationFailed => {
                return Err(ServiceError::CreationFailed(self.creation_status));
            }
            _ => return Err(ServiceError::InvalidState(state)),
        }
        let Some(runtime) = &self.runtime else {
            return Err(ServiceError::CreationFailed(self.creation_status));
        };
        let control = &self.control;
        let handler = &mut self.handler;
        let fault_status =
            fault::catch("fault_status", || handler.fault_status()).unwrap_or(NtStatus::SERVICE_FAULT);

        control.set_state(ServiceState::Running);
        if let Err(status) = fault::contain("on_start", fault_status, || {
            handler.on_start(control, args)
        }) {
            control.set_state(ServiceState::Stopped);

            return Err(ServiceError::StartFailed(status));
        }
        log::info!(target: logging::SERVICE_TARGET, "{} started", control.name());

        let shutdown = control.shared.shutdown.clone();
        let console_mode = self.console_mode;
        runtime.block_on(async {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = console_interrupt(), if console_mode => {
                    log::info!(target: logging::SERVICE_TARGET, "{}: interrupted", control.name());
                }
            }
        });

        if let Err(status) = fault::contain("on_stop", fault_status, || handler.on_stop(control)) {
            Self::log(
                EventSeverity::Warning,
                &format!("The service {} has failed to stop (Status={status})", control.name()),
            );
        }
        control.shared.shutdown.cancel();
        control.set_state(ServiceState::Stopped);
        log::info!(target: logging::SERVICE_TARGET, "{} stopped", control.name());

        Ok(control.exit_code())
    }
}

/// Resolves on Ctrl-C. Never resolves if the interrupt can't be
/// listened to.
async fn console_interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("cannot listen to console interrupts: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use userfs_core::FsError;

    #[derive(Default)]
    struct Recorder {
        args: Vec<String>,
        started: u32,
        stopped: u32,
        fail_start: Option<NtStatus>,
        panic_on_start: bool,
        stop_from_start: bool,
    }

    impl ServiceHandler for Recorder {
        fn on_start(&mut self, control: &ServiceControl, args: &[String]) -> FsResult<()> {
            self.started += 1;
            self.args = args.to_vec();
            if self.panic_on_start {
                panic!("start");
            }
            if let Some(status) = self.fail_start {
                return Err(FsError::Status(status));
            }
            if self.stop_from_start {
                control.set_exit_code(7);
                control.stop();
            }

            Ok(())
        }

        fn on_stop(&mut self, _control: &ServiceControl) -> FsResult<()> {
            self.stopped += 1;

            Ok(())
        }
    }

    fn service(handler: Recorder) -> Service<Recorder> {
        let _ = env_logger::try_init();
        let mut service = Service::new("memfs", handler);
        service.set_console_mode(false);

        service
    }

    #[test]
    fn run_until_stopped() {
        let mut service = service(Recorder::default());
        assert_eq!(ServiceState::Created, service.state());
        let control = service.control();

        let stopper = thread::spawn(move || {
            while control.state() != ServiceState::Running {
                thread::sleep(Duration::from_millis(5));
            }
            control.stop();
        });
        let args = vec!["-m".to_string(), "M:".to_string()];
        assert_eq!(0, service.run(&args));
        stopper.join().expect("stopper");

        assert_eq!(ServiceState::Stopped, service.state());
        assert_eq!(1, service.handler().started);
        assert_eq!(1, service.handler().stopped);
        assert_eq!(args, service.handler().args);
    }

    #[test]
    fn handler_sets_exit_code() {
        let mut service = service(Recorder {
            stop_from_start: true,
            ..Recorder::default()
        });

        assert_eq!(7, service.run(&[]));
        assert_eq!(1, service.handler().stopped);
    }

    #[test]
    fn stop_before_run() -> anyhow::Result<()> {
        let mut service = service(Recorder::default());
        service.stop();

        assert_eq!(0, service.try_run(&[])?);
        assert_eq!(1, service.handler().started);
        assert_eq!(1, service.handler().stopped);

        Ok(())
    }

    #[test]
    fn stop_twice_after_stopped() -> anyhow::Result<()> {
        let mut service = service(Recorder::default());
        service.stop();
        service.try_run(&[])?;
        assert_eq!(ServiceState::Stopped, service.state());

        service.stop();
        service.stop();
        assert_eq!(ServiceState::Stopped, service.state());
        assert_eq!(1, service.handler().stopped);

        Ok(())
    }

    #[test]
    fn run_twice() -> anyhow::Result<()> {
        let mut service = service(Recorder::default());
        service.stop();
        service.try_run(&[])?;

        assert!(matches!(
            service.try_run(&[]),
            Err(ServiceError::InvalidState(ServiceState::Stopped))
        ));
        assert_eq!(
            NtStatus::INVALID_DEVICE_STATE.to_win32(),
            service.run(&[])
        );
        assert_eq!(1, service.handler().started);

        Ok(())
    }

    #[test]
    fn empty_name() {
        let _ = env_logger::try_init();
        let mut service = Service::new("", Recorder::default());
        assert_eq!(ServiceState::CreationFailed, service.state());
        assert_eq!(NtStatus::INVALID_PARAMETER, service.creation_status());

        // Reported on every run.
        let expected = NtStatus::INVALID_PARAMETER.to_win32();
        assert_eq!(expected, service.run(&[]));
        assert_eq!(expected, service.run(&[]));
        assert!(matches!(
            service.try_run(&[]),
            Err(ServiceError::CreationFailed(NtStatus::INVALID_PARAMETER))
        ));

        service.stop();
        assert_eq!(ServiceState::CreationFailed, service.state());
        assert_eq!(0, service.handler().started);
    }

    #[test]
    fn failed_start() {
        let mut service = service(Recorder {
            fail_start: Some(NtStatus::ACCESS_DENIED),
            ..Recorder::default()
        });

        assert!(matches!(
            service.try_run(&[]),
            Err(ServiceError::StartFailed(NtStatus::ACCESS_DENIED))
        ));
        assert_eq!(ServiceState::Stopped, service.state());
        assert_eq!(0, service.handler().stopped);
    }

    #[test]
    fn failed_start_exit_code() {
        let mut service = service(Recorder {
            fail_start: Some(NtStatus::ACCESS_DENIED),
            ..Recorder::default()
        });

        assert_eq!(NtStatus::ACCESS_DENIED.to_win32(), service.run(&[]));
    }

    #[test]
    fn panicking_start_is_contained() {
        let mut service = service(Recorder {
            panic_on_start: true,
            ..Recorder::default()
        });

        assert!(matches!(
            service.try_run(&[]),
            Err(ServiceError::StartFailed(NtStatus::SERVICE_FAULT))
        ));
        assert_eq!(ServiceState::Stopped, service.state());
    }

    struct CustomFault;

    impl ServiceHandler for CustomFault {
        fn fault_status(&self) -> NtStatus {
            NtStatus::UNEXPECTED_IO_ERROR
        }

        fn on_stop(&mut self, _control: &ServiceControl) -> FsResult<()> {
            panic!("stop");
        }
    }

    #[test]
    fn panicking_stop_still_stops() -> anyhow::Result<()> {
        let _ = env_logger::try_init();
        let mut service = Service::new("custom", CustomFault);
        service.set_console_mode(false);
        service.stop();

        assert_eq!(0, service.try_run(&[])?);
        assert_eq!(ServiceState::Stopped, service.state());

        Ok(())
    }

    #[test]
    fn error_status() {
        assert_eq!(
            NtStatus::INVALID_DEVICE_STATE,
            ServiceError::InvalidState(ServiceState::Running).status()
        );
        assert_eq!(
            NtStatus::ACCESS_DENIED.to_win32(),
            ServiceError::StartFailed(NtStatus::ACCESS_DENIED).exit_code()
        );
    }
}
