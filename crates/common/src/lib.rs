pub mod domain;
pub mod garde;
pub mod memory;
pub mod nats;
pub mod script;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockDeviceRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEventPublisher;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockGeolocationExtractor;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockGeolocationRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockMessageRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockParserRepository;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use script::MockScriptSandbox;
