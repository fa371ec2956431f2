//! can-transport: blocking CAN bus abstractions
//!
//! Traits and frame types shared by the diagnostic stack, with feature-gated
//! backends. The default build enables the in-process `mock` backend so the
//! whole stack runs on any host without adapters attached.

mod types;
pub use types::{accepted_by, BusInfo, CanFilter, CanFrame, CanId, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::CanBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, Responder};

#[cfg(feature = "slcan")]
mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::{encode_frame, parse_frame, SlcanBitrate, SlcanBus, DEFAULT_PORT_BAUD};
