use crate::error::{Error, ProtocolError, Result};
use crate::framing::{INIT_MSG_ID, INIT_RESP_ID, REQ_MSG_ID};
use crate::services::{
    self, expect_local_id, DYNAMICALLY_DEFINE_LOCAL_ID, READ_DATA_BY_LOCAL_ID, START_COMMUNICATION,
};
use crate::transport::Transport;
use crate::types::FieldDescriptor;
use can_transport::CanFrame;
use std::time::Duration;
use tracing::{debug, info};

/// Default bound on every request of the session.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(150);

/// Wait after the termination request so it leaves the adapter before the
/// transport is dropped.
pub const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Positive StartCommunication byte in the initiation reply.
const START_COMMUNICATION_OK: u8 = START_COMMUNICATION | services::POSITIVE_RESPONSE_BIT;

/// StartCommunication announcing the tester's request identifier.
fn initiation_frame() -> Option<CanFrame> {
    let [hi, lo] = (REQ_MSG_ID.raw() as u16).to_be_bytes();
    CanFrame::new(
        INIT_MSG_ID,
        &[0x3F, START_COMMUNICATION, 0x00, 0x11, hi, lo, 0x00, 0x00],
    )
}

/// An open diagnostic session. Every other protocol operation goes through it.
pub struct Session<T> {
    transport: T,
    timeout: Duration,
}

impl<T: Transport> Session<T> {
    /// Perform the initiation handshake. Nothing else may be sent when this fails.
    pub async fn open(mut transport: T, timeout: Duration) -> Result<Self> {
        let request = initiation_frame().ok_or(Error::Handshake(ProtocolError::Malformed(
            "initiation frame",
        )))?;
        let reply = transport
            .exchange_frame(request, INIT_RESP_ID, timeout)
            .await
            .map_err(Error::Handshake)?;
        match reply.payload().get(3) {
            Some(&START_COMMUNICATION_OK) => {}
            Some(&got) => {
                return Err(Error::Handshake(ProtocolError::Unexpected {
                    service: START_COMMUNICATION,
                    got,
                }))
            }
            None => {
                return Err(Error::Handshake(ProtocolError::Malformed(
                    "short initiation reply",
                )))
            }
        }
        info!("diagnostic session open");
        Ok(Self { transport, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Remove any previous record definition under `local_id`.
    pub async fn clear_local_identifier(&mut self, local_id: u8) -> Result<(), ProtocolError> {
        let response = self
            .transport
            .send_receive(&services::clear_request(local_id), self.timeout)
            .await?;
        expect_local_id(DYNAMICALLY_DEFINE_LOCAL_ID, local_id, &response)?;
        Ok(())
    }

    /// Bind `field` to position `index` of the record under `local_id`.
    pub async fn define_local_identifier(
        &mut self,
        local_id: u8,
        index: u8,
        field: &FieldDescriptor,
    ) -> Result<(), ProtocolError> {
        let request = services::define_request(local_id, index, field);
        let response = self.transport.send_receive(&request, self.timeout).await?;
        expect_local_id(DYNAMICALLY_DEFINE_LOCAL_ID, local_id, &response)?;
        Ok(())
    }

    /// Read the aggregate record under `local_id`.
    pub async fn read_local_identifier(&mut self, local_id: u8) -> Result<Vec<u8>, ProtocolError> {
        let response = self
            .transport
            .send_receive(&services::read_request(local_id), self.timeout)
            .await?;
        let record = expect_local_id(READ_DATA_BY_LOCAL_ID, local_id, &response)?;
        Ok(record.to_vec())
    }

    /// Send StopCommunication, then wait out the grace period whatever happened.
    pub async fn close(mut self) -> Result<T, (T, ProtocolError)> {
        let sent = self.transport.send(&services::stop_request()).await;
        tokio::time::sleep(CLOSE_GRACE).await;
        match sent {
            Ok(()) => {
                debug!("diagnostic session closed");
                Ok(self.transport)
            }
            Err(e) => Err((self.transport, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{segment, RESP_MSG_ID, TESTER_ADDR};
    use crate::transport::CanTransport;
    use can_transport::{CanBus, MockBus};

    fn init_reply(byte3: u8) -> CanFrame {
        CanFrame::new(INIT_RESP_ID, &[0x40, 0xBF, 0x21, byte3, 0, 0, 0, 0]).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_frame_and_accept() {
        let bus = MockBus::with_responder("mock0", |f: &CanFrame| {
            if f.id == INIT_MSG_ID {
                vec![init_reply(0xC1)]
            } else {
                Vec::new()
            }
        })
        .recording();
        let session = Session::open(CanTransport::new(bus), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(session.timeout(), DEFAULT_TIMEOUT);

        let bus = session.transport.into_inner().unwrap();
        assert_eq!(
            bus.sent()[0].payload(),
            &[0x3F, 0x81, 0x00, 0x11, 0x02, 0x40, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_reply() {
        let bus = MockBus::with_responder("mock0", |_: &CanFrame| vec![init_reply(0x7F)]);
        let err = Session::open(CanTransport::new(bus), DEFAULT_TIMEOUT)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Handshake(ProtocolError::Unexpected { got: 0x7F, .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_rejects_short_reply() {
        let bus = MockBus::with_responder("mock0", |_: &CanFrame| {
            vec![CanFrame::new(INIT_RESP_ID, &[0x40, 0xBF, 0x21]).unwrap()]
        });
        let err = Session::open(CanTransport::new(bus), DEFAULT_TIMEOUT)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Handshake(ProtocolError::Malformed("short initiation reply"))
        ));
    }

    #[tokio::test]
    async fn test_handshake_times_out_on_silent_bus() {
        let bus = MockBus::open("mock0").unwrap();
        let err = Session::open(CanTransport::new(bus), Duration::from_millis(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Handshake(ProtocolError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_read_returns_record_only() {
        let bus = MockBus::with_responder("mock0", |f: &CanFrame| {
            if f.id == INIT_MSG_ID {
                return vec![init_reply(0xC1)];
            }
            segment(RESP_MSG_ID, TESTER_ADDR, &[0x61, 0xF0, 0x0D, 0x64]).unwrap()
        });
        let mut session = Session::open(CanTransport::new(bus), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        let record = session.read_local_identifier(0xF0).await.unwrap();
        assert_eq!(record, vec![0x0D, 0x64]);
    }

    #[tokio::test]
    async fn test_close_sends_stop_and_waits() {
        let bus = MockBus::with_responder("mock0", |f: &CanFrame| {
            if f.id == INIT_MSG_ID {
                vec![init_reply(0xC1)]
            } else {
                Vec::new()
            }
        })
        .recording();
        let session = Session::open(CanTransport::new(bus), DEFAULT_TIMEOUT)
            .await
            .unwrap();
        let started = std::time::Instant::now();
        let transport = session.close().await.ok().unwrap();
        assert!(started.elapsed() >= CLOSE_GRACE);

        let bus = transport.into_inner().unwrap();
        let last = bus.sent().last().unwrap();
        assert_eq!(last.id, REQ_MSG_ID);
        assert_eq!(last.payload(), &[0x40, 0xA1, 0x01, 0x82, 0, 0, 0, 0]);
    }
}
