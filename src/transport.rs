//! # Transport Layer
//!
//! The transport boundary consumed by tasks and the scheduler: a framed
//! read/write request against one remote unit, returning a byte payload or
//! an error. Two implementations are provided, TCP (MBAP framing with
//! transaction identifiers) and RTU (serial framing with CRC-16 and an
//! inter-frame gap).
//!
//! A transport serializes access to one physical medium; callers issue one
//! request at a time. Every request is bounded by the transport's timeout,
//! so no call suspends indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::error::{PollError, PollResult};

/// Read holding registers.
const FUNCTION_READ: u8 = 0x03;
/// Write multiple registers.
const FUNCTION_WRITE: u8 = 0x10;
/// Largest register count one read request may carry.
const MAX_READ_WORDS: u16 = 125;
/// Largest register count one write request may carry.
const MAX_WRITE_WORDS: u16 = 123;

const MODBUS_CRC: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_MODBUS);

/// Counters maintained by every transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    /// Fraction of requests that completed without error.
    pub fn success_rate(&self) -> f64 {
        let total = self.reads + self.writes;
        if total == 0 {
            return 0.0;
        }
        (total.saturating_sub(self.errors)) as f64 / total as f64
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads: {}, writes: {}, errors: {}, success rate: {:.1}%",
            self.reads,
            self.writes,
            self.errors,
            self.success_rate() * 100.0
        )
    }
}

/// A framed request/response channel to remote register space.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `words` registers starting at `address` from `unit`.
    ///
    /// Returns exactly `words * 2` bytes in wire order on success.
    async fn read(&mut self, unit: u8, address: u16, words: u16) -> PollResult<Vec<u8>>;

    /// Write `data` (two bytes per register) starting at `address` on
    /// `unit`.
    async fn write(&mut self, unit: u8, address: u16, data: &[u8]) -> PollResult<()>;

    /// Health probe: re-establish the underlying connection if necessary.
    ///
    /// `Ok` means the transport is ready for requests again.
    async fn probe(&mut self) -> PollResult<()>;

    /// Whether the underlying connection is currently established.
    fn is_connected(&self) -> bool;

    /// Close the underlying connection.
    async fn close(&mut self) -> PollResult<()>;

    /// Counters accumulated over the transport's lifetime.
    fn stats(&self) -> TransportStats;
}

#[async_trait]
impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    async fn read(&mut self, unit: u8, address: u16, words: u16) -> PollResult<Vec<u8>> {
        (**self).read(unit, address, words).await
    }

    async fn write(&mut self, unit: u8, address: u16, data: &[u8]) -> PollResult<()> {
        (**self).write(unit, address, data).await
    }

    async fn probe(&mut self) -> PollResult<()> {
        (**self).probe().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn close(&mut self) -> PollResult<()> {
        (**self).close().await
    }

    fn stats(&self) -> TransportStats {
        (**self).stats()
    }
}

fn check_read_count(words: u16) -> PollResult<()> {
    if words == 0 || words > MAX_READ_WORDS {
        return Err(PollError::configuration(format!(
            "read count {} outside 1..={}",
            words, MAX_READ_WORDS
        )));
    }
    Ok(())
}

fn check_write_data(data: &[u8]) -> PollResult<u16> {
    if data.is_empty() || data.len() % 2 != 0 {
        return Err(PollError::configuration(format!(
            "write payload of {} bytes is not a whole number of registers",
            data.len()
        )));
    }
    let words = (data.len() / 2) as u16;
    if words > MAX_WRITE_WORDS {
        return Err(PollError::configuration(format!(
            "write count {} outside 1..={}",
            words, MAX_WRITE_WORDS
        )));
    }
    Ok(words)
}

fn read_request_pdu(address: u16, words: u16) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);
    pdu.push(FUNCTION_READ);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&words.to_be_bytes());
    pdu
}

fn write_request_pdu(address: u16, words: u16, data: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(6 + data.len());
    pdu.push(FUNCTION_WRITE);
    pdu.extend_from_slice(&address.to_be_bytes());
    pdu.extend_from_slice(&words.to_be_bytes());
    pdu.push(data.len() as u8);
    pdu.extend_from_slice(data);
    pdu
}

/// Validate a response PDU against the request function code, surfacing
/// device exceptions.
fn check_response_function(unit: u8, function: u8, pdu: &[u8]) -> PollResult<()> {
    if pdu.is_empty() {
        return Err(PollError::malformed_response("empty response PDU"));
    }
    if pdu[0] == function | 0x80 {
        let code = pdu.get(1).copied().unwrap_or(0);
        return Err(PollError::device_exception(unit, code));
    }
    if pdu[0] != function {
        return Err(PollError::malformed_response(format!(
            "function code {:#04X} in response to {:#04X}",
            pdu[0], function
        )));
    }
    Ok(())
}

fn extract_read_payload(unit: u8, words: u16, pdu: &[u8]) -> PollResult<Vec<u8>> {
    check_response_function(unit, FUNCTION_READ, pdu)?;
    let expected = words as usize * 2;
    if pdu.len() != 2 + expected || pdu[1] as usize != expected {
        return Err(PollError::malformed_response(format!(
            "read response carries {} bytes, expected {}",
            pdu.len().saturating_sub(2),
            expected
        )));
    }
    Ok(pdu[2..].to_vec())
}

fn check_write_echo(unit: u8, address: u16, words: u16, pdu: &[u8]) -> PollResult<()> {
    check_response_function(unit, FUNCTION_WRITE, pdu)?;
    if pdu.len() != 5 {
        return Err(PollError::malformed_response(format!(
            "write echo of {} bytes, expected 5",
            pdu.len()
        )));
    }
    let echo_address = u16::from_be_bytes([pdu[1], pdu[2]]);
    let echo_words = u16::from_be_bytes([pdu[3], pdu[4]]);
    if echo_address != address || echo_words != words {
        return Err(PollError::malformed_response(format!(
            "write echo for {}+{}, requested {}+{}",
            echo_address, echo_words, address, words
        )));
    }
    Ok(())
}

/// TCP transport with MBAP framing.
pub struct TcpTransport {
    endpoint: String,
    stream: Option<TcpStream>,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Connect to `endpoint` (host:port) with the given per-request
    /// timeout.
    pub async fn connect(endpoint: &str, request_timeout: Duration) -> PollResult<Self> {
        let stream = Self::open(endpoint, request_timeout).await?;
        info!(endpoint, "TCP transport connected");
        Ok(Self {
            endpoint: endpoint.to_string(),
            stream: Some(stream),
            timeout: request_timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
        })
    }

    async fn open(endpoint: &str, request_timeout: Duration) -> PollResult<TcpStream> {
        let stream = timeout(request_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| {
                PollError::timeout("tcp connect", request_timeout.as_millis() as u64)
            })??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// One MBAP transaction: send the PDU, return the response PDU.
    ///
    /// Any I/O failure drops the connection so the scheduler's probe path
    /// re-establishes it.
    async fn transact(&mut self, unit: u8, pdu: &[u8]) -> PollResult<Vec<u8>> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let tid = self.transaction_id;

        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&tid.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(&((pdu.len() as u16 + 1).to_be_bytes()));
        frame.push(unit);
        frame.extend_from_slice(pdu);

        debug!(unit, frame = %hex::encode(&frame), "TCP TX");

        let result = self.transact_inner(&frame).await;
        if let Err(ref error) = result {
            if matches!(
                error,
                PollError::ConnectionLost { .. } | PollError::Timeout { .. }
            ) {
                self.stream = None;
            }
            return result;
        }

        let response = result?;
        self.stats.bytes_sent += frame.len() as u64;
        self.stats.bytes_received += (7 + response.len()) as u64;

        debug!(unit, pdu = %hex::encode(&response), "TCP RX");
        Ok(response)
    }

    async fn transact_inner(&mut self, frame: &[u8]) -> PollResult<Vec<u8>> {
        let ms = self.timeout.as_millis() as u64;
        let expected_tid = u16::from_be_bytes([frame[0], frame[1]]);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("TCP stream not connected"))?;

        timeout(self.timeout, stream.write_all(frame))
            .await
            .map_err(|_| PollError::timeout("tcp send", ms))??;

        let mut header = [0u8; 7];
        timeout(self.timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| PollError::timeout("tcp receive", ms))??;

        let tid = u16::from_be_bytes([header[0], header[1]]);
        let protocol = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if protocol != 0 {
            return Err(PollError::malformed_response(format!(
                "MBAP protocol id {:#06X}",
                protocol
            )));
        }
        if tid != expected_tid {
            return Err(PollError::malformed_response(format!(
                "transaction id {} in response to {}",
                tid, expected_tid
            )));
        }
        if length < 2 || length > 256 {
            return Err(PollError::malformed_response(format!(
                "MBAP length field {}",
                length
            )));
        }

        // The unit byte is already in the header; length counts it.
        let mut pdu = vec![0u8; length - 1];
        timeout(self.timeout, stream.read_exact(&mut pdu))
            .await
            .map_err(|_| PollError::timeout("tcp receive", ms))??;

        Ok(pdu)
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn read(&mut self, unit: u8, address: u16, words: u16) -> PollResult<Vec<u8>> {
        check_read_count(words)?;
        self.stats.reads += 1;

        let pdu = read_request_pdu(address, words);
        match self.transact(unit, &pdu).await {
            Ok(response) => match extract_read_payload(unit, words, &response) {
                Ok(payload) => Ok(payload),
                Err(error) => {
                    self.stats.errors += 1;
                    Err(error)
                }
            },
            Err(error) => {
                self.stats.errors += 1;
                Err(error)
            }
        }
    }

    async fn write(&mut self, unit: u8, address: u16, data: &[u8]) -> PollResult<()> {
        let words = check_write_data(data)?;
        self.stats.writes += 1;

        let pdu = write_request_pdu(address, words, data);
        let result = self.transact(unit, &pdu).await.and_then(|response| {
            check_write_echo(unit, address, words, &response)
        });
        if result.is_err() {
            self.stats.errors += 1;
        }
        result
    }

    async fn probe(&mut self) -> PollResult<()> {
        self.stream = None;
        let stream = Self::open(&self.endpoint, self.timeout).await?;
        self.stream = Some(stream);
        info!(endpoint = %self.endpoint, "TCP transport reconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> PollResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Serial port settings for the RTU transport.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub path: String,
    pub baud_rate: u32,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Quiet time enforced between frames (the 3.5-character gap).
    pub frame_gap: Duration,
}

impl SerialConfig {
    pub fn new<S: Into<String>>(path: S, baud_rate: u32) -> Self {
        // 3.5 character times at 11 bits per character, with the fixed
        // 1.75ms floor applied above 19200 baud.
        let gap_micros = if baud_rate > 19200 {
            1750
        } else {
            (3_850_000 / baud_rate as u64).max(1)
        };
        Self {
            path: path.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
            frame_gap: Duration::from_micros(gap_micros),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// RTU transport over a serial line, with CRC-16/MODBUS framing.
pub struct RtuTransport {
    config: SerialConfig,
    port: Option<SerialStream>,
    last_frame: Option<Instant>,
    stats: TransportStats,
}

impl RtuTransport {
    /// Open the serial port described by `config`.
    pub fn open(config: SerialConfig) -> PollResult<Self> {
        let port = Self::open_port(&config)?;
        info!(path = %config.path, baud = config.baud_rate, "RTU transport opened");
        Ok(Self {
            config,
            port: Some(port),
            last_frame: None,
            stats: TransportStats::default(),
        })
    }

    fn open_port(config: &SerialConfig) -> PollResult<SerialStream> {
        tokio_serial::new(&config.path, config.baud_rate)
            .timeout(config.timeout)
            .open_native_async()
            .map_err(|e| {
                PollError::connection_lost(format!("serial open {}: {}", config.path, e))
            })
    }

    async fn enforce_frame_gap(&mut self) {
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.config.frame_gap {
                tokio::time::sleep(self.config.frame_gap - elapsed).await;
            }
        }
    }

    /// One RTU transaction: append the CRC, send, read and verify the
    /// response, return the response PDU.
    async fn transact(&mut self, unit: u8, pdu: &[u8]) -> PollResult<Vec<u8>> {
        self.enforce_frame_gap().await;

        let mut frame = Vec::with_capacity(3 + pdu.len() + 2);
        frame.push(unit);
        frame.extend_from_slice(pdu);
        let crc = MODBUS_CRC.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        debug!(unit, frame = %hex::encode(&frame), "RTU TX");

        let result = self.transact_inner(unit, pdu[0], &frame).await;
        self.last_frame = Some(Instant::now());

        if let Err(ref error) = result {
            if matches!(
                error,
                PollError::ConnectionLost { .. } | PollError::Timeout { .. }
            ) {
                self.port = None;
            }
            return result;
        }

        let response = result?;
        self.stats.bytes_sent += frame.len() as u64;
        debug!(unit, pdu = %hex::encode(&response), "RTU RX");
        Ok(response)
    }

    async fn transact_inner(
        &mut self,
        unit: u8,
        function: u8,
        frame: &[u8],
    ) -> PollResult<Vec<u8>> {
        let ms = self.config.timeout.as_millis() as u64;
        let deadline = self.config.timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| PollError::connection_lost("serial port not open"))?;

        timeout(deadline, port.write_all(frame))
            .await
            .map_err(|_| PollError::timeout("rtu send", ms))??;

        // Echo unit and function code first, then a length that depends on
        // the function.
        let mut head = [0u8; 2];
        timeout(deadline, port.read_exact(&mut head))
            .await
            .map_err(|_| PollError::timeout("rtu receive", ms))??;

        let mut raw = head.to_vec();
        if head[1] == function | 0x80 {
            let mut rest = [0u8; 3];
            timeout(deadline, port.read_exact(&mut rest))
                .await
                .map_err(|_| PollError::timeout("rtu receive", ms))??;
            raw.extend_from_slice(&rest);
        } else if head[1] == FUNCTION_READ {
            let mut count = [0u8; 1];
            timeout(deadline, port.read_exact(&mut count))
                .await
                .map_err(|_| PollError::timeout("rtu receive", ms))??;
            raw.push(count[0]);
            let mut rest = vec![0u8; count[0] as usize + 2];
            timeout(deadline, port.read_exact(&mut rest))
                .await
                .map_err(|_| PollError::timeout("rtu receive", ms))??;
            raw.extend_from_slice(&rest);
        } else if head[1] == FUNCTION_WRITE {
            let mut rest = [0u8; 6];
            timeout(deadline, port.read_exact(&mut rest))
                .await
                .map_err(|_| PollError::timeout("rtu receive", ms))??;
            raw.extend_from_slice(&rest);
        } else {
            return Err(PollError::malformed_response(format!(
                "function code {:#04X} in response to {:#04X}",
                head[1], function
            )));
        }

        let (body, crc_bytes) = raw.split_at(raw.len() - 2);
        let expected = MODBUS_CRC.checksum(body);
        let received = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if expected != received {
            return Err(PollError::malformed_response(format!(
                "CRC mismatch: computed {:#06X}, received {:#06X}",
                expected, received
            )));
        }
        if body[0] != unit {
            return Err(PollError::malformed_response(format!(
                "unit {} in response to {}",
                body[0], unit
            )));
        }

        self.stats.bytes_received += raw.len() as u64;
        Ok(body[1..].to_vec())
    }
}

#[async_trait]
impl RegisterTransport for RtuTransport {
    async fn read(&mut self, unit: u8, address: u16, words: u16) -> PollResult<Vec<u8>> {
        check_read_count(words)?;
        self.stats.reads += 1;

        let pdu = read_request_pdu(address, words);
        let result = self
            .transact(unit, &pdu)
            .await
            .and_then(|response| extract_read_payload(unit, words, &response));
        if result.is_err() {
            self.stats.errors += 1;
        }
        result
    }

    async fn write(&mut self, unit: u8, address: u16, data: &[u8]) -> PollResult<()> {
        let words = check_write_data(data)?;
        self.stats.writes += 1;

        let pdu = write_request_pdu(address, words, data);
        let result = self
            .transact(unit, &pdu)
            .await
            .and_then(|response| check_write_echo(unit, address, words, &response));
        if result.is_err() {
            self.stats.errors += 1;
        }
        result
    }

    async fn probe(&mut self) -> PollResult<()> {
        self.port = None;
        let port = Self::open_port(&self.config)?;
        self.port = Some(port);
        self.last_frame = None;
        info!(path = %self.config.path, "RTU transport reopened");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn close(&mut self) -> PollResult<()> {
        self.port = None;
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
