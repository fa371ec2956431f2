use crate::{
    accepted_by, BusInfo, CanBus, CanFilter, CanFrame, CanId, Result, TransportError,
};
use serialport::{SerialPort, SerialPortType};
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Serial line speed used by Lawicel CANUSB style adapters.
pub const DEFAULT_PORT_BAUD: u32 = 3_000_000;

/// Byte stream to the adapter.
trait LinePort: Read + Write + Send {
    /// Bytes already received by the OS and not yet read.
    fn waiting(&self) -> usize;
}

impl LinePort for Box<dyn SerialPort> {
    fn waiting(&self) -> usize {
        self.bytes_to_read().map(|n| n as usize).unwrap_or(0)
    }
}

/// SLCAN text protocol over serial (Lawicel CANUSB and compatible dongles)
pub struct SlcanBus {
    port_path: String,
    port: Box<dyn LinePort>,
    filters: Vec<CanFilter>,
    pending: Vec<u8>,
}

impl SlcanBus {
    /// Open `path`, program the CAN bitrate and put the channel on bus.
    pub fn open_with(path: &str, port_baud: u32, bitrate: Option<SlcanBitrate>) -> Result<Self> {
        let mut port = serialport::new(path, port_baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::InterfaceNotFound(path.into()),
                _ => TransportError::Io(e.to_string()),
            })?;
        // Channel may still be open from a previous run; close errors are expected
        let _ = port.write_all(b"C\r");
        let code = bitrate.unwrap_or(SlcanBitrate::B500k).code();
        port.write_all(&[b'S', code, b'\r'])?;
        port.write_all(b"O\r")?;
        debug!(path, bitrate = %char::from(code), "slcan channel open");
        Ok(Self::with_port(path, Box::new(port)))
    }

    fn with_port(path: &str, port: Box<dyn LinePort>) -> Self {
        SlcanBus {
            port_path: path.to_string(),
            port,
            filters: Vec::new(),
            pending: Vec::with_capacity(64),
        }
    }

    pub fn path(&self) -> &str {
        &self.port_path
    }

    /// Pop one complete `\r`-terminated line from the pending buffer.
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|&b| b == b'\r')?;
        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}

impl Drop for SlcanBus {
    fn drop(&mut self) {
        let _ = self.port.write_all(b"C\r");
    }
}

/// Render a frame as an SLCAN transmit command, including the trailing `\r`.
pub fn encode_frame(frame: &CanFrame) -> Result<Vec<u8>> {
    if frame.len > 8 {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }
    let mut out = Vec::with_capacity(32);
    let (kind, id) = match (frame.id.is_extended(), frame.rtr) {
        (false, false) => (b't', format!("{:03X}", frame.id.raw())),
        (false, true) => (b'r', format!("{:03X}", frame.id.raw())),
        (true, false) => (b'T', format!("{:08X}", frame.id.raw())),
        (true, true) => (b'R', format!("{:08X}", frame.id.raw())),
    };
    out.push(kind);
    out.extend_from_slice(id.as_bytes());
    out.push(b'0' + frame.len);
    if !frame.rtr {
        for b in frame.payload() {
            out.extend_from_slice(format!("{b:02X}").as_bytes());
        }
    }
    out.push(b'\r');
    Ok(out)
}

/// Parse one SLCAN receive line (without the `\r` terminator).
pub fn parse_frame(line: &[u8]) -> Result<CanFrame> {
    let (&kind, rest) = line
        .split_first()
        .ok_or(TransportError::InvalidFrame("empty"))?;
    let (id_len, extended, rtr) = match kind {
        b't' => (3, false, false),
        b'r' => (3, false, true),
        b'T' => (8, true, false),
        b'R' => (8, true, true),
        _ => return Err(TransportError::InvalidFrame("unknown header")),
    };
    if rest.len() < id_len + 1 {
        return Err(TransportError::InvalidFrame("short header"));
    }
    let raw = u32::from_str_radix(hex_str(&rest[..id_len])?, 16)
        .map_err(|_| TransportError::InvalidFrame("id"))?;
    let id = if extended {
        CanId::extended(raw)
    } else {
        u16::try_from(raw).ok().and_then(CanId::standard)
    }
    .ok_or(TransportError::InvalidFrame("id range"))?;

    let dlc = rest[id_len].wrapping_sub(b'0');
    if dlc > 8 {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }
    let mut data = [0u8; 8];
    if !rtr {
        let hex = &rest[id_len + 1..];
        if hex.len() < usize::from(dlc) * 2 {
            return Err(TransportError::InvalidFrame("short data"));
        }
        for (i, pair) in hex.chunks(2).take(usize::from(dlc)).enumerate() {
            data[i] = u8::from_str_radix(hex_str(pair)?, 16)
                .map_err(|_| TransportError::InvalidFrame("byte"))?;
        }
    }
    Ok(CanFrame {
        id,
        len: dlc,
        data,
        rtr,
        timestamp: None,
    }
    .stamped())
}

fn hex_str(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| TransportError::InvalidFrame("utf8"))
}

impl CanBus for SlcanBus {
    fn open(path: &str) -> Result<Self>
    where
        Self: Sized,
    {
        Self::open_with(path, DEFAULT_PORT_BAUD, Some(SlcanBitrate::B500k))
    }

    fn list() -> Result<Vec<BusInfo>> {
        let ports = serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let driver = match p.port_type {
                    SerialPortType::UsbPort(u) => match u.product {
                        Some(product) => format!("slcan-usb ({product})"),
                        None => "slcan-usb".to_string(),
                    },
                    _ => "serial".to_string(),
                };
                BusInfo {
                    name: p.port_name,
                    driver,
                }
            })
            .collect())
    }

    /// SLCAN hardware acceptance registers differ between adapters, so
    /// filtering happens on the host.
    fn set_filters(&mut self, filters: &[CanFilter]) -> Result<()> {
        self.filters = filters.to_vec();
        Ok(())
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut buf = [0u8; 128];
        loop {
            while let Some(line) = self.next_line() {
                match line.first() {
                    // transmit acknowledgements and empty command replies
                    None | Some(b'z') | Some(b'Z') => continue,
                    Some(0x07) => {
                        warn!(port = %self.port_path, "adapter rejected a command");
                        continue;
                    }
                    Some(_) => {}
                }
                match parse_frame(&line) {
                    Ok(frame) if accepted_by(&self.filters, frame.id) => return Ok(frame),
                    Ok(_) => {}
                    Err(e) => warn!(port = %self.port_path, "skipping line: {e}"),
                }
            }
            // Bytes the OS already holds are consumed even past the deadline,
            // so a zero timeout empties the receive buffer.
            let waiting = self.port.waiting();
            let expired = deadline.is_some_and(|d| Instant::now() >= d);
            if expired && waiting == 0 {
                return Err(TransportError::Timeout(timeout_ms.unwrap_or(0)));
            }
            let want = if waiting > 0 {
                waiting.min(buf.len())
            } else {
                buf.len()
            };
            match self.port.read(&mut buf[..want]) {
                Ok(0) if expired => return Err(TransportError::Timeout(timeout_ms.unwrap_or(0))),
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let line = encode_frame(frame)?;
        self.port.write_all(&line)?;
        Ok(())
    }
}

/// Supported SLCAN bitrates (mapped to Sx codes)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlcanBitrate {
    B10k,  // S0
    B20k,  // S1
    B50k,  // S2
    B100k, // S3
    B125k, // S4
    B250k, // S5
    B500k, // S6
    B800k, // S7
    B1M,   // S8
}

impl SlcanBitrate {
    pub fn code(self) -> u8 {
        match self {
            SlcanBitrate::B10k => b'0',
            SlcanBitrate::B20k => b'1',
            SlcanBitrate::B50k => b'2',
            SlcanBitrate::B100k => b'3',
            SlcanBitrate::B125k => b'4',
            SlcanBitrate::B250k => b'5',
            SlcanBitrate::B500k => b'6',
            SlcanBitrate::B800k => b'7',
            SlcanBitrate::B1M => b'8',
        }
    }
}
