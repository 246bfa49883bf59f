// Adapters layer: concrete record sources and sinks for external systems.

pub mod icescape;
pub mod replay;
#[cfg(feature = "warehouse")]
pub mod warehouse;

pub use icescape::IcescapeClient;
pub use replay::ReplaySource;
