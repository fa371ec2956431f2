//! kwp2000: live data acquisition over KWP2000 on CAN
//!
//! This crate provides the protocol side of the logger:
//! - Row framing and the async `Transport` over a blocking `CanBus`
//! - The diagnostic session and dynamic local identifier definition
//! - Field descriptors and the lock-step record decoder
//! - An in-process ECU simulator (feature `sim`)

mod error;
pub use error::{DefinitionError, Error, Nrc, ProtocolError, Result};

mod types;
pub use types::{
    AddressingMethod, FieldDescriptor, FieldList, FieldSpec, Reading, Scalar, Width,
    MAX_RECORD_LEN,
};

mod transform;
pub use transform::{Transform, VALUE_IDENT};

pub mod decode;
pub use decode::{decode_record, DecodeError, DecodedRecord, LayoutMismatch, RecordCursor};

pub mod framing;
pub mod services;
pub use services::RECORD_LOCAL_ID;

mod transport;
pub use transport::{CanTransport, Transport};

mod session;
pub use session::{Session, CLOSE_GRACE, DEFAULT_TIMEOUT};

mod registrar;
pub use registrar::Registrar;

#[cfg(feature = "sim")]
mod sim;

#[cfg(feature = "sim")]
pub use sim::{SimSymbol, SimulatedEcu};
