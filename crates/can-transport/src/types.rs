use core::fmt;
use time::OffsetDateTime;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub const fn standard(id11: u16) -> Option<Self> {
        if id11 <= 0x7FF {
            Some(Self {
                raw: id11 as u32,
                extended: false,
            })
        } else {
            None
        }
    }

    pub const fn extended(id29: u32) -> Option<Self> {
        if id29 <= 0x1FFF_FFFF {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    /// Standard identifier from the low 11 bits of `id`, for protocol constants.
    pub const fn standard_masked(id: u16) -> Self {
        Self {
            raw: (id & 0x7FF) as u32,
            extended: false,
        }
    }

    /// Pick the narrowest identifier form that can hold `raw`.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        if raw <= 0x7FF {
            Self::standard(raw as u16)
        } else {
            Self::extended(raw)
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A classic CAN data frame (at most 8 payload bytes)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; 8],
    pub rtr: bool,
    pub timestamp: Option<Timestamp>,
}

impl CanFrame {
    pub fn new(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            len: data.len() as u8,
            data: buf,
            rtr: false,
            timestamp: None,
        })
    }

    /// Payload bytes actually carried by the frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(self.data.len())]
    }

    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.len)?;
        for b in self.payload() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

/// Acceptance filter: a frame passes when `frame.id & mask == id & mask`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CanFilter {
    pub id: CanId,
    pub mask: u32,
}

impl CanFilter {
    /// Filter that only accepts exactly `id`.
    pub fn exact(id: CanId) -> Self {
        let mask = if id.is_extended() { 0x1FFF_FFFF } else { 0x7FF };
        Self { id, mask }
    }

    pub fn accepts(&self, id: CanId) -> bool {
        self.id.is_extended() == id.is_extended()
            && (id.raw() & self.mask) == (self.id.raw() & self.mask)
    }
}

/// True when `filters` is empty or any filter accepts `id`.
pub fn accepted_by(filters: &[CanFilter], id: CanId) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.accepts(id))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}
