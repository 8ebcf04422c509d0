// # Device Client Trait
//
// Defines the interface a coordinator polls to fetch device or cloud state.
//
// ## Implementations
//
// - Bluesound status and sync status pollers: `hubkit-bluesound` crate
// - ADS is push-driven and publishes into a coordinator directly
//
// ## Usage
//
// ```rust,ignore
// use hubkit_core::{Coordinator, DeviceClient};
//
// let coordinator = Coordinator::new(Arc::new(client), &CoordinatorConfig::default());
// let outcome = coordinator.refresh().await;
// ```

use async_trait::async_trait;

/// Trait for vendor clients driven by a [`Coordinator`](crate::Coordinator)
///
/// A client performs exactly one fetch per call. It does not sleep, retry or
/// remember whether the device was reachable last time: the coordinator owns
/// pacing, availability and retry policy.
///
/// # Errors
///
/// The returned error's [`FailureClass`](crate::FailureClass) drives the
/// coordinator:
/// - Transient (`Error::Transient`, `Error::CannotConnect`, I/O): device is
///   marked offline and polled again after the offline retry interval
/// - Fatal (`Error::InvalidAuth`, `Error::Fatal`, ...): polling stops
/// - Cancelled (`Error::Cancelled`): polling stops without logging an error
#[async_trait]
pub trait DeviceClient: Send + Sync + 'static {
    /// The materialized state this client produces
    type Data: Clone + Send + Sync + 'static;

    /// Fetch the current device state
    ///
    /// `previous` is the last successfully fetched value, if any. Long-polling
    /// clients use it to pass the device's change token (etag) so the call
    /// blocks until something changes.
    async fn fetch(&self, previous: Option<&Self::Data>) -> Result<Self::Data, crate::Error>;

    /// Name used in log lines (usually the device name or host)
    fn name(&self) -> &str;
}
