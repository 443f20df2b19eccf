//! The `CallBackend` capability shared by direct and relay dispatch.

use async_trait::async_trait;

use cr_domain::call::{CallRequest, CallStarted, MetricsSnapshot, TerminateOutcome, Transcript};
use cr_domain::config::DispatchMode;

use crate::error::CallError;

/// Where call operations are carried out.
///
/// Implementations: [`DirectBackend`](crate::DirectBackend) talks to the
/// providers in-process; [`RelayBackend`](crate::RelayBackend) forwards to
/// the supervised relay over HTTP.
#[async_trait]
pub trait CallBackend: Send + Sync {
    fn mode(&self) -> DispatchMode;

    /// Validate and place an outbound call.
    async fn start_call(&self, req: CallRequest) -> Result<CallStarted, CallError>;

    /// Transcript so far. Unknown calls yield an empty transcript.
    async fn transcript(&self, call_sid: &str) -> Result<Transcript, CallError>;

    /// Hang up. A call that already ended is not an error.
    async fn terminate_call(&self, call_sid: &str) -> Result<TerminateOutcome, CallError>;

    async fn metrics(&self) -> Result<MetricsSnapshot, CallError>;
}
