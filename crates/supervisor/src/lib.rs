pub mod backoff;
pub mod error;
pub mod health;
pub mod launcher;
pub mod startup;
pub mod state;
pub mod supervisor;

pub use backoff::{backoff_delay, BackoffPolicy, RetryState};
pub use error::{SpawnError, SupervisorError};
pub use health::{HealthCheck, HttpHealthProber};
pub use launcher::{CommandLauncher, LaunchSpec, LaunchedRelay, RelayControl, RelayEvent, RelayLauncher};
pub use startup::{StartupHook, StartupOutcome};
pub use state::{RelayStatus, SupervisorEvent, SupervisorState};
pub use supervisor::{RelaySupervisor, SupervisorSettings};
