pub mod logging;
pub mod service;

pub use logging::EventSeverity;
pub use service::{Service, ServiceControl, ServiceError, ServiceHandler, ServiceState};
