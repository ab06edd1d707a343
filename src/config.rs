//! # Configuration
//!
//! YAML configuration for one polled bus: the transport endpoint, the
//! scheduler tunables, and the task/element layout per remote unit.
//!
//! ```yaml
//! transport:
//!   tcp:
//!     endpoint: "192.168.1.50:502"
//!     timeout_ms: 500
//! scheduler:
//!   fault_threshold: 3
//!   once_retry_limit: 5
//! units:
//!   - unit: 1
//!     tasks:
//!       - direction: read
//!         priority: high
//!         elements:
//!           - channel: grid_power
//!             address: 100
//!             value_type: i32
//!           - channel: grid_voltage
//!             address: 102
//!             value_type:
//!               scaled_u16:
//!                 exponent: -1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::convert::ValueConverter;
use crate::element::RegisterElement;
use crate::error::{PollError, PollResult};
use crate::protocol::ProtocolDefinition;
use crate::scheduler::SchedulerConfig;
use crate::task::{ElementBinding, Priority, ProtocolTask, TaskDirection};
use crate::transport::{RegisterTransport, RtuTransport, SerialConfig, TcpTransport};
use crate::value::{ValueType, WordOrder};

fn default_timeout_ms() -> u64 {
    1000
}

/// Transport endpoint selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportConfig {
    Tcp {
        /// host:port of the remote gateway.
        endpoint: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Rtu {
        /// Serial device path.
        path: String,
        baud_rate: u32,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

impl TransportConfig {
    /// Open the configured transport.
    pub async fn connect(&self) -> PollResult<Box<dyn RegisterTransport>> {
        match self {
            TransportConfig::Tcp {
                endpoint,
                timeout_ms,
            } => {
                let transport =
                    TcpTransport::connect(endpoint, Duration::from_millis(*timeout_ms)).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Rtu {
                path,
                baud_rate,
                timeout_ms,
            } => {
                let config = SerialConfig::new(path.clone(), *baud_rate)
                    .with_timeout(Duration::from_millis(*timeout_ms));
                Ok(Box::new(RtuTransport::open(config)?))
            }
        }
    }
}

/// One element row in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementConfig {
    /// Store channel the element reads into or writes from.
    pub channel: String,
    pub address: u16,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub value_type: ValueType,
    #[serde(default)]
    pub word_order: WordOrder,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub converter: ValueConverter,
}

impl ElementConfig {
    fn binding(&self) -> ElementBinding {
        ElementBinding::new(
            RegisterElement::new(self.address, self.value_type).with_word_order(self.word_order),
            self.channel.clone(),
        )
        .with_converter(self.converter)
    }
}

/// One task row in the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub direction: TaskDirection,
    pub priority: Priority,
    pub elements: Vec<ElementConfig>,
}

/// Task layout for one remote unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub unit: u8,
    pub tasks: Vec<TaskConfig>,
}

/// Complete configuration for one polled bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub transport: TransportConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub units: Vec<UnitConfig>,
}

impl PollConfig {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> PollResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PollError::configuration(format!("invalid configuration: {}", e)))
    }

    /// Read and parse a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> PollResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PollError::configuration(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&text)
    }

    /// Build the protocol definition described by this configuration.
    ///
    /// Surfaces overlapping spans and malformed tasks before any transport
    /// request is issued.
    pub fn build_definition(&self) -> PollResult<ProtocolDefinition> {
        let mut definition = ProtocolDefinition::new();
        for unit in &self.units {
            for task in &unit.tasks {
                let bindings = task.elements.iter().map(ElementConfig::binding).collect();
                let task = match task.direction {
                    TaskDirection::Read => ProtocolTask::read(unit.unit, task.priority, bindings)?,
                    TaskDirection::Write => {
                        ProtocolTask::write(unit.unit, task.priority, bindings)?
                    }
                };
                definition.add_task(task)?;
            }
        }
        Ok(definition)
    }
}
