use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::counters::DriverCounters;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
}

impl LinkError {
    /// Whether the link is unusable after this error and must leave the pool.
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::Timeout(_) => false,
            LinkError::Closed => true,
            LinkError::WebSocket(e) => matches!(
                e.as_ref(),
                tungstenite::Error::Io(_) | tungstenite::Error::Protocol(_)
            ),
        }
    }
}

impl From<tungstenite::Error> for LinkError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                LinkError::Closed
            }
            other => LinkError::WebSocket(Box::new(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closing,
    Closed,
}

/// One established duplex connection owned by the driver.
pub trait Link: Send {
    /// Position of this link in the pool.
    fn index(&self) -> usize;

    fn state(&self) -> LinkState;

    /// Send a liveness probe (control frame, empty payload).
    fn ping<'a>(&'a mut self, deadline: Duration) -> BoxFuture<'a, Result<(), LinkError>>;

    fn send_text<'a>(
        &'a mut self,
        text: String,
        deadline: Duration,
    ) -> BoxFuture<'a, Result<(), LinkError>>;

    /// Graceful close: signal the peer, wait at most `grace` for it to
    /// acknowledge, then drop the transport.
    fn close(self: Box<Self>, grace: Duration) -> BoxFuture<'static, ()>;
}

/// Factory for links, one call per connection attempt.
pub trait Connector: Send + Sync {
    fn name(&self) -> &'static str;

    fn connect(&self, index: usize) -> BoxFuture<'_, Result<Box<dyn Link>, LinkError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects real WebSocket links to a single endpoint.
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
    counters: Arc<DriverCounters>,
}

impl WsConnector {
    pub fn new(url: Url, connect_timeout: Duration, counters: Arc<DriverCounters>) -> Self {
        Self {
            url,
            connect_timeout,
            counters,
        }
    }
}

impl Connector for WsConnector {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn connect(&self, index: usize) -> BoxFuture<'_, Result<Box<dyn Link>, LinkError>> {
        Box::pin(async move {
            let (ws, response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| LinkError::Timeout(self.connect_timeout))??;
            debug!(index, status = %response.status(), "WebSocket connected");

            let link = WsLink::start(index, ws, Arc::clone(&self.counters));
            Ok(Box::new(link) as Box<dyn Link>)
        })
    }
}

/// WebSocket link: the write half is driven by the send scheduler while a
/// background task drains the read half, counting echoed frames.
pub struct WsLink {
    index: usize,
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    state: LinkState,
}

impl WsLink {
    fn start(index: usize, ws: WsStream, counters: Arc<DriverCounters>) -> Self {
        let (sink, mut stream) = ws.split();

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(_)) | Ok(Message::Binary(_)) => counters.record_echo(),
                    Ok(Message::Close(frame)) => {
                        debug!(index, frame = ?frame, "Close frame from peer");
                    }
                    // Pings are answered by the protocol layer
                    Ok(_) => {}
                    Err(e) => {
                        debug!(index, error = %e, "Read side ended");
                        break;
                    }
                }
            }
        });

        Self {
            index,
            sink,
            reader,
            state: LinkState::Open,
        }
    }

    async fn send_with_deadline(
        &mut self,
        msg: Message,
        deadline: Duration,
    ) -> Result<(), LinkError> {
        let result = match timeout(deadline, self.sink.send(msg)).await {
            Ok(r) => r.map_err(LinkError::from),
            Err(_) => Err(LinkError::Timeout(deadline)),
        };
        if let Err(e) = &result {
            if e.is_fatal() {
                self.state = LinkState::Closed;
            }
        }
        result
    }
}

impl Link for WsLink {
    fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn ping<'a>(&'a mut self, deadline: Duration) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(self.send_with_deadline(Message::Ping(Vec::new()), deadline))
    }

    fn send_text<'a>(
        &'a mut self,
        text: String,
        deadline: Duration,
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(self.send_with_deadline(Message::Text(text), deadline))
    }

    fn close(mut self: Box<Self>, grace: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let index = self.index;
            if self.state == LinkState::Open {
                self.state = LinkState::Closing;
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Cow::Borrowed(""),
                };
                if let Err(e) = self
                    .send_with_deadline(Message::Close(Some(frame)), grace)
                    .await
                {
                    debug!(index, error = %e, "Failed to send close frame");
                }
            }

            // The read side finishes once the peer answers the close.
            if timeout(grace, &mut self.reader).await.is_err() {
                debug!(index, "Peer did not acknowledge close within grace period");
                self.reader.abort();
            }
            self.state = LinkState::Closed;
            // Dropping both halves closes the socket.
        })
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Scripted outcome for a mock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    Ok,
    Timeout,
    Closed,
}

impl MockOutcome {
    fn into_result(self, deadline: Duration) -> Result<(), LinkError> {
        match self {
            MockOutcome::Ok => Ok(()),
            MockOutcome::Timeout => Err(LinkError::Timeout(deadline)),
            MockOutcome::Closed => Err(LinkError::Closed),
        }
    }
}

/// Mock connector for testing (links succeed after a configurable delay)
#[derive(Clone, Default)]
pub struct MockConnector {
    delay: Duration,
    refused: Vec<usize>,
    attempts: Arc<AtomicUsize>,
    probe_outcomes: HashMap<usize, MockOutcome>,
    send_outcomes: HashMap<usize, MockOutcome>,
    tracker: Arc<InFlightTracker>,
}

impl MockConnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Refuse the `attempt`-th call to `connect` (counting from zero).
    pub fn refuse(mut self, attempt: usize) -> Self {
        self.refused.push(attempt);
        self
    }

    pub fn probe_outcome(mut self, index: usize, outcome: MockOutcome) -> Self {
        self.probe_outcomes.insert(index, outcome);
        self
    }

    pub fn send_outcome(mut self, index: usize, outcome: MockOutcome) -> Self {
        self.send_outcomes.insert(index, outcome);
        self
    }

    pub fn tracker(&self) -> Arc<InFlightTracker> {
        Arc::clone(&self.tracker)
    }
}

impl Connector for MockConnector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn connect(&self, index: usize) -> BoxFuture<'_, Result<Box<dyn Link>, LinkError>> {
        Box::pin(async move {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refused.contains(&attempt) {
                return Err(LinkError::Closed);
            }
            Ok(Box::new(MockLink {
                index,
                delay: self.delay,
                probe: self
                    .probe_outcomes
                    .get(&index)
                    .copied()
                    .unwrap_or(MockOutcome::Ok),
                send: self
                    .send_outcomes
                    .get(&index)
                    .copied()
                    .unwrap_or(MockOutcome::Ok),
                state: LinkState::Open,
                tracker: Arc::clone(&self.tracker),
            }) as Box<dyn Link>)
        })
    }
}

/// Observes how many mock sends overlap, and what was sent.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
    sends: AtomicUsize,
    closes: AtomicUsize,
    payloads: parking_lot::Mutex<Vec<String>>,
}

impl InFlightTracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockLink {
    index: usize,
    delay: Duration,
    probe: MockOutcome,
    send: MockOutcome,
    state: LinkState,
    tracker: Arc<InFlightTracker>,
}

impl Link for MockLink {
    fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn ping<'a>(&'a mut self, deadline: Duration) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(async move { self.probe.into_result(deadline) })
    }

    fn send_text<'a>(
        &'a mut self,
        text: String,
        deadline: Duration,
    ) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(async move {
            self.tracker.enter();
            sleep(self.delay).await;
            self.tracker.exit();

            let result = self.send.into_result(deadline);
            match &result {
                Ok(()) => {
                    self.tracker.sends.fetch_add(1, Ordering::SeqCst);
                    self.tracker.payloads.lock().push(text);
                }
                Err(e) if e.is_fatal() => self.state = LinkState::Closed,
                Err(_) => {}
            }
            result
        })
    }

    fn close(self: Box<Self>, grace: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            sleep(self.delay.min(grace)).await;
            self.tracker.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_classification() {
        assert!(!LinkError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(LinkError::from(tungstenite::Error::ConnectionClosed).is_fatal());
        assert!(LinkError::from(tungstenite::Error::AlreadyClosed).is_fatal());

        let io_err = tungstenite::Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(LinkError::from(io_err).is_fatal());

        let too_long = tungstenite::Error::Capacity(
            tungstenite::error::CapacityError::MessageTooLong {
                size: 2048,
                max_size: 1024,
            },
        );
        assert!(!LinkError::from(too_long).is_fatal());
    }

    #[tokio::test]
    async fn test_mock_connector_refuses_listed_attempts() {
        let connector = MockConnector::new(Duration::ZERO).refuse(1);
        assert!(connector.connect(0).await.is_ok());
        assert!(connector.connect(1).await.is_err());
        // The third attempt succeeds and keeps the index it was given.
        assert_eq!(connector.connect(1).await.unwrap().index(), 1);
    }

    #[tokio::test]
    async fn test_mock_link_closed_outcome_marks_link_closed() {
        let connector = MockConnector::new(Duration::ZERO).send_outcome(0, MockOutcome::Closed);
        let mut link = connector.connect(0).await.unwrap();
        assert_eq!(link.state(), LinkState::Open);

        let err = link
            .send_text("x".to_string(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(link.state(), LinkState::Closed);
    }
}
