//! Remote video generation providers.
//!
//! - [`VideoProvider`]: the adapter trait, with a provided
//!   [`generate`](VideoProvider::generate) that submits, polls under a
//!   bounded budget and honours cancellation.
//! - [`runway`], [`pika`]: HTTP adapters.
//! - [`mock`]: seeded, latency-simulating adapter used when no API key is
//!   configured.
//! - [`registry`]: startup-built lookup from provider name to adapter.

pub mod error;
pub mod http;
pub mod mock;
pub mod pika;
pub mod provider;
pub mod registry;
pub mod runway;

pub use error::{GenerateError, ProviderError};
pub use mock::MockProvider;
pub use provider::{GenerationRequest, PollPolicy, PollStatus, ProviderPolicy, VideoProvider};
pub use registry::{ProviderRegistry, ProvidersConfig};
