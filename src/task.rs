//! # Protocol Tasks
//!
//! A [`ProtocolTask`] binds one contiguous register span to one transport
//! operation and fans the resulting bytes out to (or in from) the register
//! elements bound to it.
//!
//! Read tasks fetch the whole span in one request and decode each element
//! from its slice of the payload. Write tasks collect pending values from
//! the store, merge the encoded bytes into a span buffer, and push the
//! buffer in one request. A span not fully covered by pending elements is
//! pre-read so adjacent registers keep their current device values.
//!
//! Element-level failures (bad payload slice, unencodable value) are logged
//! and absorbed: one bad element never invalidates siblings sharing the
//! same wire transaction. Transport failures propagate to the scheduler
//! untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::convert::ValueConverter;
use crate::element::{RegisterElement, RegisterSpan};
use crate::error::{PollError, PollResult};
use crate::store::ProcessValueStore;
use crate::transport::RegisterTransport;
use crate::value::SemanticValue;

/// Direction of a task's transport operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDirection {
    Read,
    Write,
}

/// Scheduling tier of a task.
///
/// Within one cycle every `High` task runs before any `Low` task. `Once`
/// tasks run between the two tiers and leave the schedule after their first
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Once,
    Low,
}

/// One element bound into a task, with its conversion policy and the store
/// channel it reads into or writes from.
#[derive(Debug, Clone)]
pub struct ElementBinding {
    pub element: RegisterElement,
    pub converter: ValueConverter,
    pub channel: String,
}

impl ElementBinding {
    pub fn new<S: Into<String>>(element: RegisterElement, channel: S) -> Self {
        Self {
            element,
            converter: ValueConverter::Identity,
            channel: channel.into(),
        }
    }

    pub fn with_converter(mut self, converter: ValueConverter) -> Self {
        self.converter = converter;
        self
    }
}

/// A unit of scheduled work: one transport operation against one span.
#[derive(Debug, Clone)]
pub struct ProtocolTask {
    direction: TaskDirection,
    unit: u8,
    priority: Priority,
    span: RegisterSpan,
    bindings: Vec<ElementBinding>,
}

impl ProtocolTask {
    /// Build a read task over the union span of its bindings.
    pub fn read(unit: u8, priority: Priority, bindings: Vec<ElementBinding>) -> PollResult<Self> {
        Self::build(TaskDirection::Read, unit, priority, bindings)
    }

    /// Build a write task over the union span of its bindings.
    pub fn write(unit: u8, priority: Priority, bindings: Vec<ElementBinding>) -> PollResult<Self> {
        Self::build(TaskDirection::Write, unit, priority, bindings)
    }

    fn build(
        direction: TaskDirection,
        unit: u8,
        priority: Priority,
        bindings: Vec<ElementBinding>,
    ) -> PollResult<Self> {
        if bindings.is_empty() {
            return Err(PollError::configuration("task has no bound elements"));
        }

        for binding in &bindings {
            if binding.element.span().words == 0 {
                return Err(PollError::configuration(format!(
                    "element for channel '{}' has zero width",
                    binding.channel
                )));
            }
        }

        // Elements sharing one wire transaction must not overlap each other.
        for (i, a) in bindings.iter().enumerate() {
            for b in bindings.iter().skip(i + 1) {
                if a.element.span().overlaps(&b.element.span()) {
                    return Err(PollError::configuration(format!(
                        "elements for channels '{}' and '{}' overlap at span {}",
                        a.channel,
                        b.channel,
                        b.element.span()
                    )));
                }
            }
        }

        let start = bindings
            .iter()
            .map(|b| b.element.address())
            .min()
            .unwrap_or(0);
        let end = bindings
            .iter()
            .map(|b| b.element.span().end())
            .max()
            .unwrap_or(0);
        let width = end - start as u32;
        if end > u16::MAX as u32 + 1 || width > u16::MAX as u32 {
            return Err(PollError::configuration(format!(
                "span {}..{} exceeds the register address space",
                start, end
            )));
        }

        Ok(Self {
            direction,
            unit,
            priority,
            span: RegisterSpan::new(start, width as u16),
            bindings,
        })
    }

    pub fn direction(&self) -> TaskDirection {
        self.direction
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn span(&self) -> RegisterSpan {
        self.span
    }

    pub fn bindings(&self) -> &[ElementBinding] {
        &self.bindings
    }

    /// Byte offset of an element within the task's span buffer.
    fn offset_of(&self, element: &RegisterElement) -> usize {
        (element.address() - self.span.address) as usize * 2
    }

    /// Execute the task's transport operation and apply the result to the
    /// store.
    ///
    /// Transport errors are returned without any store mutation. Element
    /// errors are logged per element and absorbed.
    pub async fn execute(
        &self,
        transport: &mut dyn RegisterTransport,
        store: &dyn ProcessValueStore,
    ) -> PollResult<()> {
        match self.direction {
            TaskDirection::Read => self.execute_read(transport, store).await,
            TaskDirection::Write => self.execute_write(transport, store).await,
        }
    }

    async fn execute_read(
        &self,
        transport: &mut dyn RegisterTransport,
        store: &dyn ProcessValueStore,
    ) -> PollResult<()> {
        let payload = transport
            .read(self.unit, self.span.address, self.span.words)
            .await?;

        let expected = self.span.words as usize * 2;
        if payload.len() != expected {
            return Err(PollError::malformed_response(format!(
                "read of span {} returned {} bytes, expected {}",
                self.span,
                payload.len(),
                expected
            )));
        }

        for binding in &self.bindings {
            let offset = self.offset_of(&binding.element);
            let width = binding.element.value_type().width_bytes();
            let slice = &payload[offset..offset + width];

            match binding
                .element
                .decode(slice)
                .and_then(|raw| binding.converter.apply(&raw))
            {
                Ok(value) => {
                    debug!(channel = %binding.channel, %value, "channel updated");
                    store.set_read_value(&binding.channel, value);
                }
                Err(error) => {
                    warn!(
                        channel = %binding.channel,
                        %error,
                        "decode failed, channel left undefined this cycle"
                    );
                }
            }
        }

        Ok(())
    }

    async fn execute_write(
        &self,
        transport: &mut dyn RegisterTransport,
        store: &dyn ProcessValueStore,
    ) -> PollResult<()> {
        // Snapshot pending values first: a value queued after this point
        // goes out on the next cycle.
        let mut staged: Vec<(&ElementBinding, SemanticValue, Vec<u8>)> = Vec::new();
        let mut covered_words: u32 = 0;

        for binding in &self.bindings {
            let Some(pending) = store.pending_write(&binding.channel) else {
                continue;
            };

            match binding
                .converter
                .invert(&pending)
                .and_then(|raw| binding.element.encode(&raw))
            {
                Ok(bytes) => {
                    covered_words += binding.element.span().words as u32;
                    staged.push((binding, pending, bytes));
                }
                Err(error) => {
                    warn!(
                        channel = %binding.channel,
                        %error,
                        "value cannot be encoded, write dropped"
                    );
                    // Retrying a deterministic encode failure next cycle
                    // would fail identically.
                    store.clear_pending_write(&binding.channel, &pending);
                }
            }
        }

        if staged.is_empty() {
            return Ok(());
        }

        // When the staged elements leave gaps in the span, pre-read the
        // span so adjacent registers keep their current device values.
        let mut buffer = if covered_words == self.span.words as u32 {
            vec![0u8; self.span.words as usize * 2]
        } else {
            let current = transport
                .read(self.unit, self.span.address, self.span.words)
                .await?;
            if current.len() != self.span.words as usize * 2 {
                return Err(PollError::malformed_response(format!(
                    "read-modify-write pre-read of span {} returned {} bytes",
                    self.span,
                    current.len()
                )));
            }
            current
        };

        for (binding, _, bytes) in &staged {
            let offset = self.offset_of(&binding.element);
            buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        transport
            .write(self.unit, self.span.address, &buffer)
            .await?;

        // Confirmed on the wire: release exactly the snapshots we sent.
        for (binding, snapshot, _) in &staged {
            store.clear_pending_write(&binding.channel, snapshot);
        }

        Ok(())
    }
}
