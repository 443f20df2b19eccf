//! `cr-calls`: call orchestration for callrelay.
//!
//! Validation, the in-memory [`CallTracker`], telephony and voice-agent
//! clients, and the [`CallBackend`] strategy with its direct and relay
//! implementations behind the [`CallDispatcher`] façade.

pub mod agent;
pub mod backend;
pub mod direct;
pub mod dispatcher;
pub mod error;
pub mod relay;
pub mod telephony;
pub mod tracker;
pub mod twiml;
pub mod validation;

pub use agent::{ElevenLabsClient, VoiceAgentClient};
pub use backend::CallBackend;
pub use direct::{DirectBackend, ProviderClients};
pub use dispatcher::{create_backend, CallDispatcher, SelectedBackend};
pub use error::CallError;
pub use relay::{RelayBackend, RelayLifecycle, TerminateResponse};
pub use telephony::{EndOutcome, PlaceCall, PlacedCall, TelephonyClient, TwilioClient};
pub use tracker::{CallTracker, StatusUpdate};

use cr_domain::error::Error;

/// Map a transport error onto the shared error type.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
