//! Request builders and response checks for the services the logger uses.

use crate::error::{Nrc, ProtocolError};
use crate::types::{AddressingMethod, FieldDescriptor};

pub const START_COMMUNICATION: u8 = 0x81;
pub const STOP_COMMUNICATION: u8 = 0x82;
pub const READ_DATA_BY_LOCAL_ID: u8 = 0x21;
pub const DYNAMICALLY_DEFINE_LOCAL_ID: u8 = 0x2C;
pub const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Positive responses echo the service id with this bit set.
pub const POSITIVE_RESPONSE_BIT: u8 = 0x40;

/// Local identifier the aggregate record is defined under and read from.
pub const RECORD_LOCAL_ID: u8 = 0xF0;

/// `definitionMode` byte of DynamicallyDefineLocalIdentifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DefineMode {
    ByLocalId = 0x01,
    Clear = 0x04,
    BySymbol = 0x80,
}

impl From<AddressingMethod> for DefineMode {
    fn from(method: AddressingMethod) -> Self {
        match method {
            AddressingMethod::SymbolAddress => DefineMode::BySymbol,
            AddressingMethod::LocationId => DefineMode::ByLocalId,
        }
    }
}

impl DefineMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(DefineMode::ByLocalId),
            0x04 => Some(DefineMode::Clear),
            0x80 => Some(DefineMode::BySymbol),
            _ => None,
        }
    }
}

/// Bind `field` to position `index` of the record under `local_id`.
pub fn define_request(local_id: u8, index: u8, field: &FieldDescriptor) -> Vec<u8> {
    let [hi, lo] = field.address.to_be_bytes();
    vec![
        DYNAMICALLY_DEFINE_LOCAL_ID,
        local_id,
        DefineMode::from(field.method) as u8,
        index,
        0x00,
        hi,
        lo,
    ]
}

pub fn clear_request(local_id: u8) -> Vec<u8> {
    vec![DYNAMICALLY_DEFINE_LOCAL_ID, local_id, DefineMode::Clear as u8]
}

pub fn read_request(local_id: u8) -> Vec<u8> {
    vec![READ_DATA_BY_LOCAL_ID, local_id]
}

pub fn stop_request() -> Vec<u8> {
    vec![STOP_COMMUNICATION]
}

/// `7F <service> 78`: the ECU needs more time, keep listening.
pub fn is_response_pending(message: &[u8]) -> bool {
    matches!(message, [NEGATIVE_RESPONSE, _, code] if Nrc(*code) == Nrc::RESPONSE_PENDING)
}

/// Check that `response` answers `service` positively and return its parameters.
pub fn expect_positive(service: u8, response: &[u8]) -> Result<&[u8], ProtocolError> {
    match response {
        [] => Err(ProtocolError::Malformed("empty response")),
        [NEGATIVE_RESPONSE, rejected, code, ..] if *rejected == service => {
            Err(ProtocolError::Negative {
                service,
                code: Nrc(*code),
            })
        }
        [sid, params @ ..] if *sid == (service | POSITIVE_RESPONSE_BIT) => Ok(params),
        [sid, ..] => Err(ProtocolError::Unexpected { service, got: *sid }),
    }
}

/// Like [`expect_positive`], additionally requiring the echoed local identifier.
pub fn expect_local_id(service: u8, local_id: u8, response: &[u8]) -> Result<&[u8], ProtocolError> {
    match expect_positive(service, response)? {
        [echo, rest @ ..] if *echo == local_id => Ok(rest),
        [_, ..] => Err(ProtocolError::Malformed("local identifier mismatch")),
        [] => Err(ProtocolError::Malformed("missing local identifier")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Width;

    #[test]
    fn test_define_request_layout() {
        let sym = FieldDescriptor::new("n", AddressingMethod::SymbolAddress, 3428, Width::Word);
        assert_eq!(
            define_request(RECORD_LOCAL_ID, 0, &sym),
            vec![0x2C, 0xF0, 0x80, 0x00, 0x00, 0x0D, 0x64]
        );
        let loc = FieldDescriptor::new("q", AddressingMethod::LocationId, 104, Width::Word);
        assert_eq!(
            define_request(RECORD_LOCAL_ID, 7, &loc),
            vec![0x2C, 0xF0, 0x01, 0x07, 0x00, 0x00, 0x68]
        );
        assert_eq!(clear_request(0xF0), vec![0x2C, 0xF0, 0x04]);
    }

    #[test]
    fn test_expect_positive() {
        assert_eq!(expect_positive(0x21, &[0x61, 0xF0, 0x01]).unwrap(), &[0xF0, 0x01]);
        match expect_positive(0x2C, &[0x7F, 0x2C, 0x31]) {
            Err(ProtocolError::Negative { service: 0x2C, code }) => {
                assert_eq!(code, Nrc::REQUEST_OUT_OF_RANGE)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            expect_positive(0x21, &[0x6C, 0xF0]),
            Err(ProtocolError::Unexpected { service: 0x21, got: 0x6C })
        ));
        assert!(expect_positive(0x21, &[]).is_err());
    }

    #[test]
    fn test_expect_local_id() {
        assert_eq!(expect_local_id(0x21, 0xF0, &[0x61, 0xF0, 0x0D, 0x64]).unwrap(), &[0x0D, 0x64]);
        assert!(expect_local_id(0x21, 0xF0, &[0x61, 0xF1]).is_err());
    }

    #[test]
    fn test_response_pending() {
        assert!(is_response_pending(&[0x7F, 0x21, 0x78]));
        assert!(!is_response_pending(&[0x7F, 0x21, 0x31]));
        assert!(!is_response_pending(&[0x61, 0xF0]));
    }
}
