//! # Delivery Orchestrator
//!
//! Drives the whole pipeline: serial lines in, bundles out.
//!
//! ```text
//! Initializing -> AwaitingReachability -> SessionHandshake -> Collecting <-> Flushing
//! ```
//!
//! Everything runs sequentially on one task. A flush holds up serial reads for
//! its whole duration, and records reach the backlog and the bundle in
//! arrival order.

pub mod sleep;

pub use sleep::{Sleeper, TokioSleeper};

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backlog::RecordSink;
use crate::bundle::Bundle;
use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::serial::{LineReader, SerialPortIO};
use crate::transport::Transport;

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourierState {
    Initializing,
    AwaitingReachability,
    SessionHandshake,
    Collecting,
    Flushing,
}

/// What happened to one reassembled line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Line lacked the sentinel and was dropped
    Discarded,
    /// Line was added; carries the bundle record count
    Buffered(usize),
    /// Line did not fit; the bundle was emptied and the line dropped
    Overflowed,
    /// Line closed a fix cycle and the bundle was pushed
    Flushed { delivered: bool },
}

/// Running counters, logged after each flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourierStats {
    pub lines_received: u64,
    pub lines_discarded: u64,
    pub lines_buffered: u64,
    pub overflows: u64,
    pub bundles_delivered: u64,
    pub bundles_failed: u64,
    pub backlog_failures: u64,
}

/// Endpoints and record rules used by the orchestrator
#[derive(Debug, Clone)]
pub struct CourierSettings {
    pub ping_path: String,
    pub session_path: String,
    pub push_path: String,
    pub pong_prefix: String,
    pub retry_interval: Duration,
    pub sentinel: char,
    pub flush_tag: String,
    pub bundle_capacity: usize,
}

impl CourierSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_path: config.endpoint.ping_path.clone(),
            session_path: config.endpoint.session_path.clone(),
            push_path: config.endpoint.push_path.clone(),
            pong_prefix: config.endpoint.pong_prefix.clone(),
            retry_interval: Duration::from_millis(config.endpoint.retry_interval_ms),
            sentinel: config.bundle.sentinel,
            flush_tag: config.bundle.flush_tag.clone(),
            bundle_capacity: config.bundle.capacity,
        }
    }
}

impl Default for CourierSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Delivery orchestrator owning the bundle and its collaborators
pub struct Courier<T, Z> {
    transport: T,
    sleeper: Z,
    sink: Box<dyn RecordSink>,
    bundle: Bundle,
    settings: CourierSettings,
    state: CourierState,
    stats: CourierStats,
}

impl<T: Transport, Z: Sleeper> Courier<T, Z> {
    /// Allocate the bundle and take ownership of the collaborators
    pub fn new(transport: T, sleeper: Z, sink: Box<dyn RecordSink>, settings: CourierSettings) -> Self {
        Self {
            transport,
            sleeper,
            sink,
            bundle: Bundle::new(settings.bundle_capacity),
            settings,
            state: CourierState::Initializing,
            stats: CourierStats::default(),
        }
    }

    pub fn state(&self) -> CourierState {
        self.state
    }

    pub fn stats(&self) -> CourierStats {
        self.stats
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    fn transition(&mut self, next: CourierState) {
        debug!("Courier state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Probe the liveness endpoint until it answers
    ///
    /// Unreachable endpoints are retried forever with a fixed delay. A
    /// response that does not start with the pong prefix is not retried.
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Number of failed attempts before the endpoint answered
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedPong` if the endpoint answers with anything else
    pub async fn await_reachability(&mut self) -> Result<u64> {
        self.transition(CourierState::AwaitingReachability);

        let mut failures: u64 = 0;
        let response = loop {
            match self.transport.fetch(&self.settings.ping_path).await {
                Ok(response) => break response,
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Could not reach endpoint ({}), waiting {:?}",
                        e, self.settings.retry_interval
                    );
                    self.sleeper.sleep(self.settings.retry_interval).await;
                }
            }
        };

        if !response.starts_with(self.settings.pong_prefix.as_str()) {
            return Err(CourierError::UnexpectedPong(response));
        }

        info!("Endpoint reachable after {} failed attempts", failures);
        Ok(failures)
    }

    /// Open a session with the collection service
    ///
    /// # Errors
    ///
    /// Returns `Handshake` if no response is obtained
    pub async fn start_session(&mut self) -> Result<()> {
        self.transition(CourierState::SessionHandshake);

        self.transport
            .fetch(&self.settings.session_path)
            .await
            .map_err(|e| CourierError::Handshake(e.to_string()))?;

        info!("Session started");
        self.transition(CourierState::Collecting);
        Ok(())
    }

    /// Process one reassembled line
    ///
    /// Admissible lines are written to the backlog and appended to the bundle.
    /// A line starting with the flush tag pushes the bundle. Every failure in
    /// here is recoverable and only logged.
    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.stats.lines_received += 1;
        debug!(">> {}", line);

        if !line.starts_with(self.settings.sentinel) {
            self.stats.lines_discarded += 1;
            return LineOutcome::Discarded;
        }

        if let Err(e) = self.sink.append(line) {
            self.stats.backlog_failures += 1;
            warn!("Failed to write backlog: {}", e);
        }

        let count = match self.bundle.append(line) {
            Ok(count) => count,
            Err(e) => {
                warn!("{}, dropping {} buffered records", e, self.bundle.record_count());
                self.stats.overflows += 1;
                self.bundle.reset();
                return LineOutcome::Overflowed;
            }
        };
        self.stats.lines_buffered += 1;

        if line.starts_with(self.settings.flush_tag.as_str()) {
            let delivered = self.flush().await;
            return LineOutcome::Flushed { delivered };
        }

        LineOutcome::Buffered(count)
    }

    /// Push the current bundle once and empty it, whatever the outcome
    async fn flush(&mut self) -> bool {
        self.transition(CourierState::Flushing);

        let delivered = match self
            .transport
            .push(&self.settings.push_path, &self.bundle)
            .await
        {
            Ok(_) => {
                self.stats.bundles_delivered += 1;
                true
            }
            Err(e) => {
                self.stats.bundles_failed += 1;
                warn!("Cannot send datapoint: {}", e);
                false
            }
        };

        self.bundle.reset();
        self.transition(CourierState::Collecting);

        debug!("{:?}", self.stats);
        delivered
    }

    /// Collect lines forever
    ///
    /// Over-long and non-ASCII lines are skipped. Returns only on a fatal
    /// serial error.
    pub async fn run<S: SerialPortIO>(&mut self, reader: &mut LineReader<S>) -> Result<()> {
        self.transition(CourierState::Collecting);
        info!("Waiting for serial data");

        loop {
            let line = match reader.read_line().await {
                Ok(line) => line,
                Err(CourierError::LineTooLong { limit }) => {
                    warn!("Dropping serial data longer than {} bytes", limit);
                    continue;
                }
                Err(e @ CourierError::NonAsciiLine { .. }) => {
                    warn!("Dropping serial line: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.handle_line(&line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sleep::mocks::RecordingSleeper;
    use super::*;
    use crate::backlog::mocks::MemorySink;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::transport::MockTransport;

    fn settings() -> CourierSettings {
        CourierSettings {
            retry_interval: Duration::from_millis(1000),
            bundle_capacity: 128,
            ..CourierSettings::default()
        }
    }

    fn courier(
        transport: MockTransport,
    ) -> (Courier<MockTransport, RecordingSleeper>, RecordingSleeper, MemorySink) {
        let sleeper = RecordingSleeper::new();
        let sink = MemorySink::new();
        let courier = Courier::new(transport, sleeper.clone(), Box::new(sink.clone()), settings());
        (courier, sleeper, sink)
    }

    fn unreachable() -> CourierError {
        CourierError::Transport("Failed to connect".to_string())
    }

    #[tokio::test]
    async fn test_reachability_retries_then_succeeds() {
        let mut transport = MockTransport::new();
        let mut attempts = 0;
        transport.expect_fetch().times(4).returning(move |_| {
            attempts += 1;
            if attempts <= 3 {
                Err(CourierError::Transport("Failed to connect".to_string()))
            } else {
                Ok("{\"pong\": true}".to_string())
            }
        });

        let (mut courier, sleeper, _) = courier(transport);
        assert_eq!(courier.state(), CourierState::Initializing);

        let failures = courier.await_reachability().await.unwrap();

        assert_eq!(failures, 3);
        assert_eq!(sleeper.get_waits(), vec![Duration::from_millis(1000); 3]);
        assert_eq!(courier.state(), CourierState::AwaitingReachability);
    }

    #[tokio::test]
    async fn test_reachability_first_try_never_sleeps() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .withf(|path| path.ends_with("/api/ping"))
            .times(1)
            .returning(|_| Ok("{\"pong\":1}".to_string()));

        let (mut courier, sleeper, _) = courier(transport);
        assert_eq!(courier.await_reachability().await.unwrap(), 0);
        assert!(sleeper.get_waits().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_pong_is_fatal_without_retry() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .times(1)
            .returning(|_| Ok("<html>502 Bad Gateway</html>".to_string()));

        let (mut courier, sleeper, _) = courier(transport);

        match courier.await_reachability().await {
            Err(CourierError::UnexpectedPong(body)) => assert!(body.contains("502")),
            other => panic!("Expected UnexpectedPong, got: {:?}", other),
        }
        assert!(sleeper.get_waits().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pong_is_fatal() {
        let mut transport = MockTransport::new();
        transport.expect_fetch().times(1).returning(|_| Ok(String::new()));

        let (mut courier, _, _) = courier(transport);
        assert!(matches!(
            courier.await_reachability().await,
            Err(CourierError::UnexpectedPong(_))
        ));
    }

    #[tokio::test]
    async fn test_startup_retries_ping_then_handshakes_once() {
        let mut transport = MockTransport::new();
        let mut pings = 0;
        transport
            .expect_fetch()
            .withf(|path| path.ends_with("/api/ping"))
            .times(3)
            .returning(move |_| {
                pings += 1;
                if pings < 3 {
                    Err(CourierError::Transport("Failed to connect".to_string()))
                } else {
                    Ok("{\"pong\": true}".to_string())
                }
            });
        transport
            .expect_fetch()
            .withf(|path| path.ends_with("/api/push/session"))
            .times(1)
            .returning(|_| Ok(String::new()));

        let (mut courier, sleeper, _) = courier(transport);

        assert_eq!(courier.await_reachability().await.unwrap(), 2);
        courier.start_session().await.unwrap();

        assert_eq!(sleeper.get_waits().len(), 2);
        assert_eq!(courier.state(), CourierState::Collecting);
    }

    #[tokio::test]
    async fn test_session_handshake_success() {
        let mut transport = MockTransport::new();
        transport
            .expect_fetch()
            .withf(|path| path.ends_with("/api/push/session"))
            .times(1)
            .returning(|_| Ok("{\"session\": 42}".to_string()));

        let (mut courier, _, _) = courier(transport);
        courier.start_session().await.unwrap();
        assert_eq!(courier.state(), CourierState::Collecting);
    }

    #[tokio::test]
    async fn test_session_handshake_failure_is_fatal() {
        let mut transport = MockTransport::new();
        transport.expect_fetch().times(1).returning(|_| Err(unreachable()));

        let (mut courier, sleeper, _) = courier(transport);

        match courier.start_session().await {
            Err(CourierError::Handshake(msg)) => assert!(msg.contains("Failed to connect")),
            other => panic!("Expected Handshake error, got: {:?}", other),
        }
        assert!(sleeper.get_waits().is_empty());
    }

    #[tokio::test]
    async fn test_inadmissible_lines_are_discarded() {
        let transport = MockTransport::new();
        let (mut courier, _, sink) = courier(transport);

        assert_eq!(courier.handle_line("GPGGA,1,2,3").await, LineOutcome::Discarded);
        assert_eq!(courier.handle_line("garbage").await, LineOutcome::Discarded);

        assert!(courier.bundle().is_empty());
        assert!(sink.get_lines().is_empty());
        assert_eq!(courier.stats().lines_discarded, 2);
    }

    #[tokio::test]
    async fn test_flush_round_trip() {
        let mut transport = MockTransport::new();
        transport
            .expect_push()
            .withf(|path, bundle| {
                path.ends_with("/api/push/datapoint")
                    && bundle.content() == b"$GPGGA,1,2,3\n$GPRMC,4,5,6\n".as_slice()
                    && bundle.length() == 26
            })
            .times(1)
            .returning(|_, _| Ok("{\"status\": \"ok\"}".to_string()));

        let (mut courier, _, sink) = courier(transport);

        assert_eq!(courier.handle_line("$GPGGA,1,2,3").await, LineOutcome::Buffered(1));
        assert_eq!(
            courier.handle_line("$GPRMC,4,5,6").await,
            LineOutcome::Flushed { delivered: true }
        );

        assert_eq!(courier.bundle().length(), 0);
        assert_eq!(courier.bundle().record_count(), 0);
        assert_eq!(courier.state(), CourierState::Collecting);
        assert_eq!(sink.get_lines(), vec!["$GPGGA,1,2,3", "$GPRMC,4,5,6"]);
        assert_eq!(courier.stats().bundles_delivered, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_still_resets_bundle() {
        let mut transport = MockTransport::new();
        transport.expect_push().times(1).returning(|_, _| Err(unreachable()));

        let (mut courier, sleeper, _) = courier(transport);

        courier.handle_line("$GPGGA,1").await;
        assert_eq!(
            courier.handle_line("$GPRMC,2").await,
            LineOutcome::Flushed { delivered: false }
        );

        assert_eq!(courier.bundle().length(), 0);
        assert_eq!(courier.stats().bundles_failed, 1);
        // Failed pushes are never retried
        assert!(sleeper.get_waits().is_empty());
    }

    #[tokio::test]
    async fn test_overflow_resets_and_drops_line() {
        let transport = MockTransport::new();
        let (mut courier, _, sink) = courier(transport);

        // 10 lines of 11 framed bytes fill 110 of 128 bytes
        for i in 0..10 {
            let line = format!("$GPGSV,{:03}", i);
            assert_eq!(courier.handle_line(&line).await, LineOutcome::Buffered(i + 1));
        }

        let long = format!("$GPGSV,{}", "x".repeat(20));
        assert_eq!(courier.handle_line(&long).await, LineOutcome::Overflowed);
        assert!(courier.bundle().is_empty());
        assert_eq!(courier.stats().overflows, 1);

        // The backlog still got the dropped line
        assert_eq!(sink.get_lines().len(), 11);

        // Collection continues with an empty bundle
        assert_eq!(courier.handle_line("$GPGGA,1").await, LineOutcome::Buffered(1));
    }

    #[tokio::test]
    async fn test_backlog_failure_is_not_fatal() {
        let transport = MockTransport::new();
        let (mut courier, _, sink) = courier(transport);
        sink.set_fail(true);

        assert_eq!(courier.handle_line("$GPGGA,1").await, LineOutcome::Buffered(1));
        assert_eq!(courier.stats().backlog_failures, 1);
        assert_eq!(courier.bundle().record_count(), 1);
    }

    #[tokio::test]
    async fn test_only_flush_tag_triggers_push() {
        let mut transport = MockTransport::new();
        transport
            .expect_push()
            .times(1)
            .returning(|_, _| Ok("ok".to_string()));

        let (mut courier, _, _) = courier(transport);

        for line in ["$GPGGA,1", "$GPGSA,2", "$GPGSV,3", "$GPVTG,4", "$GPRMC,5"] {
            courier.handle_line(line).await;
        }
        assert!(courier.bundle().is_empty());
    }

    #[tokio::test]
    async fn test_run_feeds_serial_lines_until_device_closes() {
        let mut transport = MockTransport::new();
        transport
            .expect_push()
            .withf(|_, bundle| bundle.content() == b"$GPGGA,1,2,3\n$GPRMC,7\n".as_slice())
            .times(1)
            .returning(|_, _| Ok("ok".to_string()));

        let (mut courier, _, sink) = courier(transport);

        let serial = MockSerialPort::with_chunks(&[
            b"\n\nnoise\n$GPGGA,1,2,3",
            b"\n",
            b"$GPRMC,7\r\n$GPGSA,8\n",
        ]);
        let mut reader = LineReader::new(serial, 64);

        let result = courier.run(&mut reader).await;

        assert!(matches!(result, Err(CourierError::SerialClosed)));
        assert_eq!(sink.get_lines(), vec!["$GPGGA,1,2,3", "$GPRMC,7", "$GPGSA,8"]);
        assert_eq!(courier.bundle().content(), b"$GPGSA,8\n");

        let stats = courier.stats();
        assert_eq!(stats.lines_received, 4);
        assert_eq!(stats.lines_discarded, 1);
        assert_eq!(stats.bundles_delivered, 1);
    }

    #[tokio::test]
    async fn test_run_skips_overlong_lines() {
        let transport = MockTransport::new();
        let (mut courier, _, _) = courier(transport);

        let serial = MockSerialPort::with_chunks(&[b"$GPGGA,0123456789abcdef", b"\n$GPGSA,1\n"]);
        let mut reader = LineReader::new(serial, 8);

        let result = courier.run(&mut reader).await;

        assert!(matches!(result, Err(CourierError::SerialClosed)));
        assert_eq!(courier.bundle().content(), b"$GPGSA,1\n");
    }

    #[tokio::test]
    async fn test_run_skips_non_ascii_lines() {
        let transport = MockTransport::new();
        let (mut courier, _, sink) = courier(transport);

        let serial = MockSerialPort::with_chunks(&[b"$GPGGA,\xc3\xa9\n$GPGSA,1\n"]);
        let mut reader = LineReader::new(serial, 64);

        let result = courier.run(&mut reader).await;

        assert!(matches!(result, Err(CourierError::SerialClosed)));
        assert_eq!(sink.get_lines(), vec!["$GPGSA,1"]);
        assert_eq!(courier.bundle().content(), b"$GPGSA,1\n");
    }

    #[tokio::test]
    async fn test_run_stops_on_serial_error() {
        let transport = MockTransport::new();
        let (mut courier, _, _) = courier(transport);

        let serial = MockSerialPort::new();
        serial.push_error(std::io::ErrorKind::BrokenPipe);
        let mut reader = LineReader::new(serial, 64);

        assert!(matches!(courier.run(&mut reader).await, Err(CourierError::Serial(_))));
    }
}
