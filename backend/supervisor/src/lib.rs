//! Native application sessions: the registry that owns them and the process
//! backends that create them.

pub mod backends;
pub mod process;
pub mod registry;

pub use backends::{
    BackendSet, ExecBackend, LaunchRequest, ProcessBackend, SunshineBackend, SunshineConfig,
    XpraBackend, XpraConfig,
};
pub use process::ProcessHandle;
pub use registry::{NativeSession, NativeSessionRegistry, Reservation, SessionSpec, SessionToken};
