use crate::error::ProtocolError;
use crate::framing::{self, Reassembler, ECU_ADDR, INIT_RESP_ID, REQ_MSG_ID, RESP_MSG_ID};
use crate::services::is_response_pending;
use async_trait::async_trait;
use can_transport::{CanBus, CanFilter, CanFrame, CanId, TransportError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Request/response access to the ECU.
///
/// Implementations own the underlying bus exclusively; only one exchange is
/// ever outstanding. A future dropped mid-exchange must leave the transport
/// usable for the next call.
#[async_trait]
pub trait Transport: Send {
    /// Send one raw frame and wait for the first frame on `response_id`.
    async fn exchange_frame(
        &mut self,
        request: CanFrame,
        response_id: CanId,
        timeout: Duration,
    ) -> Result<CanFrame, ProtocolError>;

    /// Send a KWP request message and return the complete response message.
    async fn send_receive(
        &mut self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Send a KWP request without waiting for an answer.
    async fn send(&mut self, request: &[u8]) -> Result<(), ProtocolError>;
}

/// [`Transport`] over a blocking [`CanBus`].
///
/// Each exchange runs on the blocking thread pool, so the caller's executor
/// is never blocked on bus I/O. The bus stays shared with that job: when the
/// caller gives up on an exchange, the job still finishes and the next call
/// waits for it, then drains its late replies.
pub struct CanTransport<B> {
    bus: Arc<Mutex<B>>,
}

impl<B: CanBus + Send + 'static> CanTransport<B> {
    pub fn new(mut bus: B) -> Self {
        let filters = [
            CanFilter::exact(INIT_RESP_ID),
            CanFilter::exact(RESP_MSG_ID),
        ];
        if let Err(e) = bus.set_filters(&filters) {
            debug!("bus filters not installed: {e}");
        }
        Self {
            bus: Arc::new(Mutex::new(bus)),
        }
    }

    /// Give the bus back, e.g. to inspect a mock after a run. `None` while an
    /// abandoned exchange still holds it.
    pub fn into_inner(self) -> Option<B> {
        Arc::try_unwrap(self.bus).ok()?.into_inner().ok()
    }

    async fn with_bus<R, F>(&mut self, job: F) -> Result<R, ProtocolError>
    where
        R: Send + 'static,
        F: FnOnce(&mut B) -> Result<R, ProtocolError> + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        tokio::task::spawn_blocking(move || {
            // a poisoned lock means a bus job panicked mid-exchange
            let mut bus = bus.lock().map_err(|_| TransportError::Closed)?;
            job(&mut bus)
        })
        .await
        .map_err(|e| TransportError::Io(format!("bus worker failed: {e}")))?
    }
}

#[async_trait]
impl<B: CanBus + Send + 'static> Transport for CanTransport<B> {
    async fn exchange_frame(
        &mut self,
        request: CanFrame,
        response_id: CanId,
        timeout: Duration,
    ) -> Result<CanFrame, ProtocolError> {
        self.with_bus(move |bus| {
            drain(bus);
            bus.send(&request)?;
            let deadline = Instant::now() + timeout;
            loop {
                let frame = recv_until(bus, deadline, timeout)?;
                if frame.id == response_id {
                    return Ok(frame);
                }
            }
        })
        .await
    }

    async fn send_receive(
        &mut self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        let rows = framing::segment(REQ_MSG_ID, ECU_ADDR, request)?;
        self.with_bus(move |bus| exchange_message(bus, &rows, timeout))
            .await
    }

    async fn send(&mut self, request: &[u8]) -> Result<(), ProtocolError> {
        let rows = framing::segment(REQ_MSG_ID, ECU_ADDR, request)?;
        self.with_bus(move |bus| {
            for row in &rows {
                bus.send(row)?;
            }
            Ok(())
        })
        .await
    }
}

/// Drop frames already queued from an earlier, abandoned exchange.
fn drain<B: CanBus>(bus: &mut B) {
    for _ in 0..DRAIN_LIMIT {
        match bus.recv(Some(0)) {
            Ok(stale) => trace!("discarding stale frame {stale}"),
            Err(_) => break,
        }
    }
}

/// Upper bound on stale frames dropped before one exchange.
const DRAIN_LIMIT: usize = 256;

fn recv_until<B: CanBus>(
    bus: &mut B,
    deadline: Instant,
    timeout: Duration,
) -> Result<CanFrame, ProtocolError> {
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(ProtocolError::Timeout(timeout));
        }
        let ms = u64::try_from(left.as_millis()).unwrap_or(u64::MAX).max(1);
        match bus.recv(Some(ms)) {
            Ok(frame) => return Ok(frame),
            Err(TransportError::Timeout(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn exchange_message<B: CanBus>(
    bus: &mut B,
    rows: &[CanFrame],
    timeout: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    drain(bus);
    for row in rows {
        bus.send(row)?;
    }
    let mut deadline = Instant::now() + timeout;
    let mut rx = Reassembler::default();
    loop {
        let frame = recv_until(bus, deadline, timeout)?;
        if frame.id != RESP_MSG_ID {
            continue;
        }
        if let Some(ack) = framing::ack_row(&frame) {
            bus.send(&ack)?;
        }
        let Some(message) = rx.push(&frame)? else {
            continue;
        };
        if is_response_pending(&message) {
            // the ECU asked for more time; the window restarts
            debug!("response pending");
            deadline = Instant::now() + timeout;
            continue;
        }
        return Ok(message);
    }
}
