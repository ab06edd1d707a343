//! # Error Handling
//!
//! This module provides the error taxonomy for the register codec and poll
//! scheduler, covering payload decoding, value encoding, transport failures,
//! and protocol-definition validation.
//!
//! ## Error Categories
//!
//! ### Element errors (local, absorbed at the task boundary)
//! - **MalformedPayload**: a decode received a byte slice whose length does
//!   not match the element's span
//! - **Encoding**: an application value cannot be represented in the target
//!   width/scale
//!
//! ### Transport errors (task-level, governed by the scheduler)
//! - **ConnectionLost**: the underlying TCP socket or serial port failed
//! - **Timeout**: a request exceeded its configured deadline
//! - **MalformedResponse**: the remote answered with an unparseable frame
//! - **DeviceException**: the remote unit rejected the request with a Modbus
//!   exception code
//!
//! ### Configuration errors (build-time, fatal for activation)
//! - **ScheduleConflict**: two tasks configured with overlapping register
//!   spans for the same unit and direction
//! - **Configuration**: any other invalid protocol-definition input
//!
//! ## Error Recovery
//!
//! Transport errors are the only recoverable class: the scheduler retries the
//! task on the next cycle and counts the failure toward its fault threshold.
//!
//! ```rust
//! use regpoll::PollError;
//!
//! let err = PollError::timeout("read span", 500);
//! assert!(err.is_recoverable());
//! assert!(err.is_transport_error());
//!
//! let err = PollError::encoding("value 70000 exceeds u16 range");
//! assert!(!err.is_recoverable());
//! ```

use thiserror::Error;

/// Result type alias for codec and scheduler operations.
pub type PollResult<T> = Result<T, PollError>;

/// Errors raised by the register codec, protocol tasks, and poll scheduler.
///
/// Each variant carries enough context to diagnose the failure without the
/// caller reconstructing it: expected/actual byte counts for payload errors,
/// operation name and deadline for timeouts, unit and exception code for
/// device rejections.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    /// A decode received a byte slice of the wrong length for its span.
    ///
    /// Local to one element: siblings sharing the same wire transaction are
    /// not affected.
    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    /// An application value cannot be represented in the element's
    /// width/scale (overflow, type mismatch, non-finite float).
    ///
    /// Local to one element: the write for that element is skipped, the rest
    /// of the task proceeds.
    #[error("encoding error: {message}")]
    Encoding { message: String },

    /// The transport's connection was lost or could not be established.
    #[error("connection lost: {message}")]
    ConnectionLost { message: String },

    /// A transport operation exceeded its deadline.
    #[error("timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The remote answered with a frame that could not be parsed.
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// The remote unit rejected the request with a Modbus exception code.
    ///
    /// Non-retryable for the task within the current cycle; retried on the
    /// next cycle like any other transport failure.
    #[error("device exception from unit {unit}: code {code:#04X} ({message})")]
    DeviceException { unit: u8, code: u8, message: String },

    /// Two tasks were configured with overlapping register spans for the
    /// same unit and direction.
    ///
    /// Raised while building a protocol definition, never at runtime.
    #[error("schedule conflict: unit {unit}, span {address}+{words} overlaps an existing task")]
    ScheduleConflict { unit: u8, address: u16, words: u16 },

    /// Invalid protocol-definition or scheduler configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl PollError {
    /// Create a malformed-payload error from expected/actual byte counts.
    pub fn malformed_payload(expected: usize, actual: usize) -> Self {
        Self::MalformedPayload { expected, actual }
    }

    /// Create an encoding error.
    pub fn encoding<S: Into<String>>(message: S) -> Self {
        Self::Encoding { message: message.into() }
    }

    /// Create a connection-lost error.
    pub fn connection_lost<S: Into<String>>(message: S) -> Self {
        Self::ConnectionLost { message: message.into() }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a malformed-response error.
    pub fn malformed_response<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Create a device-exception error, mapping standard Modbus exception
    /// codes to their specification names.
    pub fn device_exception(unit: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::DeviceException { unit, code, message }
    }

    /// Create a schedule-conflict error for an overlapping span.
    pub fn schedule_conflict(unit: u8, address: u16, words: u16) -> Self {
        Self::ScheduleConflict { unit, address, words }
    }

    /// Create a configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check whether retrying the failed operation on a later cycle could
    /// succeed.
    ///
    /// Transport failures are transient by nature. Element and configuration
    /// errors are deterministic: the same input fails the same way.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. }
                | Self::Timeout { .. }
                | Self::MalformedResponse { .. }
                | Self::DeviceException { .. }
        )
    }

    /// Check whether the error originated at the transport boundary.
    ///
    /// Transport errors propagate to the scheduler and count toward its
    /// consecutive-failure threshold; all other errors are absorbed at the
    /// task boundary.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. }
                | Self::Timeout { .. }
                | Self::MalformedResponse { .. }
                | Self::DeviceException { .. }
        )
    }

    /// Check whether the error is local to a single element.
    pub fn is_element_error(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. } | Self::Encoding { .. })
    }
}

impl From<std::io::Error> for PollError {
    fn from(err: std::io::Error) -> Self {
        Self::connection_lost(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PollError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("operation", 0)
    }
}
