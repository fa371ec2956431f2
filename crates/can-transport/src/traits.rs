use crate::{BusInfo, CanFilter, CanFrame, Result, TransportError};

/// A minimal blocking CAN bus interface.
pub trait CanBus {
    /// Open a CAN interface by name (e.g., "mock0", "/dev/ttyUSB0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available interfaces for this backend.
    fn list() -> Result<Vec<BusInfo>>;

    /// Install acceptance filters. An empty slice accepts every frame.
    fn set_filters(&mut self, _filters: &[CanFilter]) -> Result<()> {
        Err(TransportError::Unsupported("filters not supported"))
    }

    /// Receive one accepted frame, waiting at most `timeout_ms` when given.
    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame>;

    /// Send one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;
}
