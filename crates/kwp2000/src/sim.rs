//! An ECU that lives on a [`MockBus`] and speaks the same KWP2000 profile.

use crate::error::Nrc;
use crate::framing::{
    segment, Reassembler, ECU_ACK_ID, INIT_MSG_ID, INIT_RESP_ID, REQ_MSG_ID, RESP_MSG_ID,
    TESTER_ADDR,
};
use crate::services::{
    DefineMode, DYNAMICALLY_DEFINE_LOCAL_ID, NEGATIVE_RESPONSE, POSITIVE_RESPONSE_BIT,
    READ_DATA_BY_LOCAL_ID, START_COMMUNICATION, STOP_COMMUNICATION,
};
use crate::types::{AddressingMethod, FieldList, Width};
use can_transport::{CanFrame, MockBus};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One value the simulated ECU can put into a record.
#[derive(Debug, Clone, Copy)]
pub struct SimSymbol {
    pub width: Width,
    pub value: i64,
    /// Added to `value` after every read.
    pub step: i64,
}

impl SimSymbol {
    pub fn new(width: Width, value: i64) -> Self {
        Self {
            width,
            value,
            step: 0,
        }
    }

    pub fn ramping(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let bytes = self.value.to_be_bytes();
        out.extend_from_slice(&bytes[bytes.len() - self.width.len()..]);
    }
}

#[derive(Debug, Default)]
pub struct SimulatedEcu {
    symbols: HashMap<(AddressingMethod, u16), SimSymbol>,
    layouts: HashMap<u8, Vec<(AddressingMethod, u16)>>,
    session_open: bool,
    rx: Reassembler,
}

impl SimulatedEcu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, method: AddressingMethod, address: u16, symbol: SimSymbol) -> Self {
        self.symbols.insert((method, address), symbol);
        self
    }

    /// An ECU that knows every field of `fields`, each starting at its own
    /// address and counting up by one per read.
    pub fn for_fields(fields: &FieldList) -> Self {
        fields.iter().fold(Self::new(), |ecu, f| {
            ecu.with_symbol(
                f.method,
                f.address,
                SimSymbol::new(f.width, i64::from(f.address)).ramping(1),
            )
        })
    }

    /// React to one frame seen on the bus.
    pub fn handle(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.id == INIT_MSG_ID {
            return self.initiate(frame);
        }
        if frame.id != REQ_MSG_ID {
            return Vec::new();
        }
        let mut out: Vec<CanFrame> = ecu_ack(frame).into_iter().collect();
        match self.rx.push(frame) {
            Ok(Some(message)) => {
                if let Some(reply) = self.service(&message) {
                    match segment(RESP_MSG_ID, TESTER_ADDR, &reply) {
                        Ok(rows) => out.extend(rows),
                        Err(e) => warn!("simulated reply dropped: {e}"),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("simulated ECU discarded a request row: {e}"),
        }
        out
    }

    /// Move the ECU behind a mock bus.
    pub fn into_bus(self) -> MockBus {
        let mut ecu = self;
        MockBus::with_responder("sim0", move |frame: &CanFrame| ecu.handle(frame))
    }

    fn initiate(&mut self, frame: &CanFrame) -> Vec<CanFrame> {
        if frame.payload().get(1) != Some(&START_COMMUNICATION) {
            return Vec::new();
        }
        self.session_open = true;
        self.rx.reset();
        debug!("simulated ECU: session open");
        let ok = START_COMMUNICATION | POSITIVE_RESPONSE_BIT;
        CanFrame::new(INIT_RESP_ID, &[0x40, TESTER_ADDR, 0x21, ok, 0, 0, 0, 0])
            .into_iter()
            .collect()
    }

    fn service(&mut self, message: &[u8]) -> Option<Vec<u8>> {
        let (&sid, params) = message.split_first()?;
        if !self.session_open {
            return Some(negative(sid, Nrc::CONDITIONS_NOT_CORRECT));
        }
        let reply = match sid {
            STOP_COMMUNICATION => {
                self.session_open = false;
                vec![sid | POSITIVE_RESPONSE_BIT]
            }
            DYNAMICALLY_DEFINE_LOCAL_ID => self.define(params),
            READ_DATA_BY_LOCAL_ID => self.read(params),
            _ => negative(sid, Nrc::SERVICE_NOT_SUPPORTED),
        };
        Some(reply)
    }

    fn define(&mut self, params: &[u8]) -> Vec<u8> {
        let sid = DYNAMICALLY_DEFINE_LOCAL_ID;
        let (local_id, mode) = match params {
            [local_id, mode, ..] => (*local_id, DefineMode::from_byte(*mode)),
            _ => return negative(sid, Nrc::SUBFUNCTION_NOT_SUPPORTED),
        };
        let method = match mode {
            Some(DefineMode::Clear) => {
                self.layouts.remove(&local_id);
                return vec![sid | POSITIVE_RESPONSE_BIT, local_id];
            }
            Some(DefineMode::BySymbol) => AddressingMethod::SymbolAddress,
            Some(DefineMode::ByLocalId) => AddressingMethod::LocationId,
            None => return negative(sid, Nrc::SUBFUNCTION_NOT_SUPPORTED),
        };
        let (index, address) = match params {
            [_, _, index, _, hi, lo] => (usize::from(*index), u16::from_be_bytes([*hi, *lo])),
            _ => return negative(sid, Nrc::SUBFUNCTION_NOT_SUPPORTED),
        };
        if !self.symbols.contains_key(&(method, address)) {
            return negative(sid, Nrc::REQUEST_OUT_OF_RANGE);
        }
        let layout = self.layouts.entry(local_id).or_default();
        // positions must be filled in order
        if index != layout.len() {
            return negative(sid, Nrc::REQUEST_OUT_OF_RANGE);
        }
        layout.push((method, address));
        vec![sid | POSITIVE_RESPONSE_BIT, local_id]
    }

    fn read(&mut self, params: &[u8]) -> Vec<u8> {
        let sid = READ_DATA_BY_LOCAL_ID;
        let Some(&local_id) = params.first() else {
            return negative(sid, Nrc::SUBFUNCTION_NOT_SUPPORTED);
        };
        let Some(layout) = self.layouts.get(&local_id) else {
            return negative(sid, Nrc::REQUEST_OUT_OF_RANGE);
        };
        let mut reply = vec![sid | POSITIVE_RESPONSE_BIT, local_id];
        for key in layout {
            if let Some(symbol) = self.symbols.get_mut(key) {
                symbol.encode(&mut reply);
                symbol.value = symbol.value.wrapping_add(symbol.step);
            }
        }
        reply
    }
}

fn negative(sid: u8, code: Nrc) -> Vec<u8> {
    vec![NEGATIVE_RESPONSE, sid, code.0]
}

fn ecu_ack(row: &CanFrame) -> Option<CanFrame> {
    let header = *row.payload().first()?;
    CanFrame::new(ECU_ACK_ID, &[0x40, TESTER_ADDR, 0x3F, header & 0x3F, 0, 0, 0, 0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_record;
    use crate::error::{Error, ProtocolError};
    use crate::registrar::Registrar;
    use crate::services::RECORD_LOCAL_ID;
    use crate::session::{Session, DEFAULT_TIMEOUT};
    use crate::transport::CanTransport;
    use crate::types::{FieldDescriptor, Reading, Scalar};

    fn rpm() -> FieldList {
        FieldList::new(vec![FieldDescriptor::new(
            "rpm",
            AddressingMethod::SymbolAddress,
            0x0D64,
            Width::Word,
        )
        .signed()])
        .unwrap()
    }

    #[tokio::test]
    async fn test_define_and_read_round_trip() {
        let fields = rpm();
        let ecu = SimulatedEcu::new().with_symbol(
            AddressingMethod::SymbolAddress,
            0x0D64,
            SimSymbol::new(Width::Word, 3428),
        );
        let mut session = Session::open(CanTransport::new(ecu.into_bus()), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        Registrar::new(&mut session, RECORD_LOCAL_ID)
            .register_all(&fields)
            .await
            .unwrap();

        let record = session.read_local_identifier(RECORD_LOCAL_ID).await.unwrap();
        assert_eq!(record, vec![0x0D, 0x64]);
        let decoded = decode_record(&fields, &record);
        assert!(decoded.is_clean());
        assert_eq!(
            decoded.readings,
            vec![Reading::Value {
                raw: 3428,
                value: Scalar::Int(3428)
            }]
        );
    }

    #[tokio::test]
    async fn test_ramping_values_and_long_records() {
        let fields = FieldList::new(
            (0..20)
                .map(|i| {
                    FieldDescriptor::new(
                        format!("f{i}"),
                        AddressingMethod::LocationId,
                        i,
                        Width::Long,
                    )
                })
                .collect(),
        )
        .unwrap();
        let ecu = SimulatedEcu::for_fields(&fields);
        let mut session = Session::open(CanTransport::new(ecu.into_bus()), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        Registrar::new(&mut session, RECORD_LOCAL_ID)
            .register_all(&fields)
            .await
            .unwrap();

        let first = session.read_local_identifier(RECORD_LOCAL_ID).await.unwrap();
        let second = session.read_local_identifier(RECORD_LOCAL_ID).await.unwrap();
        assert_eq!(first.len(), 80);
        let a = decode_record(&fields, &first);
        let b = decode_record(&fields, &second);
        assert_eq!(a.readings[19].scalar(), Some(Scalar::Int(19)));
        assert_eq!(b.readings[19].scalar(), Some(Scalar::Int(20)));
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails_registration() {
        let ecu = SimulatedEcu::new();
        let mut session = Session::open(CanTransport::new(ecu.into_bus()), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        let err = Registrar::new(&mut session, RECORD_LOCAL_ID)
            .register_all(&rpm())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Registration {
                index: 0,
                source: ProtocolError::Negative {
                    code: Nrc::REQUEST_OUT_OF_RANGE,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_requests_need_an_open_session() {
        let mut ecu = SimulatedEcu::new();
        let rows = segment(REQ_MSG_ID, 0xA1, &[0x21, 0xF0]).unwrap();
        let out = ecu.handle(&rows[0]);
        let mut rx = Reassembler::default();
        let reply = out
            .iter()
            .filter(|f| f.id == RESP_MSG_ID)
            .find_map(|f| rx.push(f).unwrap())
            .unwrap();
        assert_eq!(reply, vec![0x7F, 0x21, 0x22]);
    }
}
