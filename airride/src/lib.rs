//! AirRide init system.
//!
//! A small PID-1 service supervisor: mounts the virtual filesystems,
//! parses `.service` definitions, starts services in dependency order
//! with per-service TTY or log attachment, reaps zombies, schedules
//! restarts and answers a line-oriented control protocol on a local
//! socket.

pub mod control;
pub mod error;
pub mod init;
pub mod mounts;
pub mod process;
pub mod service;
pub mod supervisor;

pub use error::{Error, Result};
pub use init::Init;
pub use service::{Service, ServiceState, ServiceType, StartupBucket};
pub use supervisor::{InitConfig, Supervisor};
