use crate::{accepted_by, BusInfo, CanBus, CanFilter, CanFrame, Result, TransportError};
use std::collections::VecDeque;
use std::time::Duration;

/// Produces the frames a simulated node answers with when it sees `frame`.
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

/// A simple in-process mock bus. Each bus instance is independent.
///
/// Frames passed to [`CanBus::send`] are handed to the optional responder and
/// whatever it returns is queued for [`CanBus::recv`].
pub struct MockBus {
    name: String,
    filters: Vec<CanFilter>,
    inbox: VecDeque<CanFrame>,
    responder: Option<Responder>,
    sent: Option<Vec<CanFrame>>,
}

impl MockBus {
    pub fn with_responder<F>(name: &str, responder: F) -> Self
    where
        F: FnMut(&CanFrame) -> Vec<CanFrame> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            filters: Vec::new(),
            inbox: VecDeque::new(),
            responder: Some(Box::new(responder)),
            sent: None,
        }
    }

    /// Keep a copy of every sent frame, see [`MockBus::sent`].
    pub fn recording(mut self) -> Self {
        self.sent = Some(Vec::new());
        self
    }

    /// Queue a frame as if it had arrived from the bus.
    pub fn inject(&mut self, frame: CanFrame) {
        self.inbox.push_back(frame);
    }

    pub fn sent(&self) -> &[CanFrame] {
        self.sent.as_deref().unwrap_or(&[])
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            filters: Vec::new(),
            inbox: VecDeque::new(),
            responder: None,
            sent: None,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn set_filters(&mut self, filters: &[CanFilter]) -> Result<()> {
        self.filters = filters.to_vec();
        Ok(())
    }

    fn recv(&mut self, timeout_ms: Option<u64>) -> Result<CanFrame> {
        while let Some(frame) = self.inbox.pop_front() {
            if accepted_by(&self.filters, frame.id) {
                return Ok(frame.stamped());
            }
        }
        // Nothing queued: behave like a quiet bus for the receive window
        let ms = timeout_ms.unwrap_or(0);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
        Err(TransportError::Timeout(ms))
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if frame.len > 8 {
            return Err(TransportError::InvalidFrame("dlc > 8"));
        }
        if let Some(log) = self.sent.as_mut() {
            log.push(frame.clone());
        }
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(frame);
            self.inbox.extend(replies);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanId;

    fn id(raw: u16) -> CanId {
        CanId::standard(raw).unwrap()
    }

    #[test]
    fn test_responder_replies_are_received() {
        let mut bus = MockBus::with_responder("mock0", |f: &CanFrame| {
            vec![CanFrame::new(CanId::standard(0x238).unwrap(), &[f.data[0]]).unwrap()]
        })
        .recording();
        bus.send(&CanFrame::new(id(0x220), &[0x3F]).unwrap()).unwrap();
        let reply = bus.recv(Some(10)).unwrap();
        assert_eq!(reply.id, id(0x238));
        assert_eq!(reply.payload(), &[0x3F]);
        assert!(reply.timestamp.is_some());
        assert_eq!(bus.sent().len(), 1);
    }

    #[test]
    fn test_filters_drop_unmatched_frames() {
        let mut bus = MockBus::open("mock0").unwrap();
        bus.set_filters(&[CanFilter::exact(id(0x258))]).unwrap();
        bus.inject(CanFrame::new(id(0x123), &[1]).unwrap());
        bus.inject(CanFrame::new(id(0x258), &[2]).unwrap());
        let frame = bus.recv(Some(0)).unwrap();
        assert_eq!(frame.payload(), &[2]);
    }

    #[test]
    fn test_empty_bus_times_out() {
        let mut bus = MockBus::open("mock0").unwrap();
        match bus.recv(Some(1)) {
            Err(TransportError::Timeout(1)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
