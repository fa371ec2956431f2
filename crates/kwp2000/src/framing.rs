//! KWP2000 messages split into 8-byte CAN rows.
//!
//! Every row is `[header, addressee, 6 data bytes]`. The header carries the
//! number of rows still to come in its low six bits and marks the first row
//! of a message with `0x40`. The first row's data starts with the message
//! length.

use crate::error::ProtocolError;
use can_transport::{CanFrame, CanId};

/// Session initiation frame, tester to ECU.
pub const INIT_MSG_ID: CanId = CanId::standard_masked(0x220);
/// Session initiation reply, ECU to tester.
pub const INIT_RESP_ID: CanId = CanId::standard_masked(0x238);
/// Request rows, tester to ECU.
pub const REQ_MSG_ID: CanId = CanId::standard_masked(0x240);
/// Response rows, ECU to tester.
pub const RESP_MSG_ID: CanId = CanId::standard_masked(0x258);
/// Tester acknowledgement of each response row.
pub const RESP_ACK_ID: CanId = CanId::standard_masked(0x266);
/// ECU acknowledgement of request rows.
pub const ECU_ACK_ID: CanId = CanId::standard_masked(0x270);

/// Addressee byte of rows sent to the ECU.
pub const ECU_ADDR: u8 = 0xA1;
/// Addressee byte of rows sent to the tester.
pub const TESTER_ADDR: u8 = 0xBF;

const FIRST_ROW: u8 = 0x40;
const ROWS_LEFT_MASK: u8 = 0x3F;
const ROW_DATA: usize = 6;

/// Split `message` into rows on `id`.
pub fn segment(id: CanId, addressee: u8, message: &[u8]) -> Result<Vec<CanFrame>, ProtocolError> {
    let len = u8::try_from(message.len())
        .map_err(|_| ProtocolError::Malformed("message longer than 255 bytes"))?;
    if len == 0 {
        return Err(ProtocolError::Malformed("empty message"));
    }
    let mut stream = Vec::with_capacity(message.len() + 1);
    stream.push(len);
    stream.extend_from_slice(message);

    let rows = stream.len().div_ceil(ROW_DATA);
    let mut frames = Vec::with_capacity(rows);
    for (i, chunk) in stream.chunks(ROW_DATA).enumerate() {
        // at most 256 bytes of stream, so at most 43 rows
        let left = (rows - 1 - i) as u8;
        let header = if i == 0 { FIRST_ROW | left } else { left };
        let mut data = [0u8; 8];
        data[0] = header;
        data[1] = addressee;
        data[2..2 + chunk.len()].copy_from_slice(chunk);
        let frame = CanFrame::new(id, &data).ok_or(ProtocolError::Malformed("row too long"))?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Acknowledge a received response row.
pub fn ack_row(row: &CanFrame) -> Option<CanFrame> {
    let header = *row.payload().first()?;
    CanFrame::new(
        RESP_ACK_ID,
        &[0x40, ECU_ADDR, 0x3F, header & !FIRST_ROW, 0, 0, 0, 0],
    )
}

/// Collects rows until a whole message is available.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    expected_len: usize,
    next_left: Option<u8>,
}

impl Reassembler {
    /// Feed one row. Returns the message once its last row has arrived.
    ///
    /// A first row always restarts reassembly, so a message abandoned by the
    /// sender does not poison the next one.
    pub fn push(&mut self, row: &CanFrame) -> Result<Option<Vec<u8>>, ProtocolError> {
        let (header, data) = match row.payload() {
            [header, _addressee, data @ ..] => (*header, data),
            _ => return Err(ProtocolError::Malformed("short row")),
        };
        let left = header & ROWS_LEFT_MASK;

        if header & FIRST_ROW != 0 {
            let (&len, rest) = data
                .split_first()
                .ok_or(ProtocolError::Malformed("first row without length"))?;
            if len == 0 {
                return Err(ProtocolError::Malformed("zero-length message"));
            }
            self.buf.clear();
            self.buf.extend_from_slice(rest);
            self.expected_len = usize::from(len);
        } else {
            match self.next_left {
                Some(expected) if expected == left => self.buf.extend_from_slice(data),
                Some(_) => {
                    self.reset();
                    return Err(ProtocolError::Malformed("row out of sequence"));
                }
                None => return Err(ProtocolError::Malformed("continuation without first row")),
            }
        }

        if left > 0 {
            self.next_left = Some(left - 1);
            return Ok(None);
        }
        let expected_len = self.expected_len;
        self.next_left = None;
        if self.buf.len() < expected_len {
            self.reset();
            return Err(ProtocolError::Malformed("message shorter than its length byte"));
        }
        let mut message = std::mem::take(&mut self.buf);
        message.truncate(expected_len);
        Ok(Some(message))
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected_len = 0;
        self.next_left = None;
    }

    pub fn in_progress(&self) -> bool {
        self.next_left.is_some()
    }
}
