//! # Poll Scheduler
//!
//! Cycle-driven executor for one protocol definition over one transport.
//! The owner calls [`cycle`](PollScheduler::cycle) once per external clock
//! tick; the scheduler never runs free.
//!
//! Each cycle walks the write set and then the read set, both in priority
//! order, executing tasks strictly sequentially against the shared
//! transport. Task results feed a consecutive-failure counter; crossing the
//! configured threshold moves the scheduler to `Faulted`, where it stops
//! issuing requests and instead probes the transport on a configurable
//! backoff until the connection is healthy again.
//!
//! One-shot tasks leave the schedule after their first success. A failing
//! one-shot task is retried on later cycles up to a bounded attempt count,
//! then dropped and reported.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::PollResult;
use crate::protocol::{ProtocolDefinition, TaskId};
use crate::store::ProcessValueStore;
use crate::task::Priority;
use crate::transport::RegisterTransport;

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next cycle tick.
    Idle,
    /// Choosing the tasks for the current cycle.
    Selecting,
    /// Running task transport operations.
    Executing,
    /// Applying task results to the store.
    Applying,
    /// The owning component is disabled; cycles are no-ops.
    Paused,
    /// Too many consecutive transport failures; probing for recovery.
    Faulted,
}

/// Spacing between transport probes while `Faulted`, measured in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Probe every `cycles` cycles.
    Fixed { cycles: u32 },
    /// Double the spacing after every failed probe, up to `max_cycles`.
    Exponential { initial_cycles: u32, max_cycles: u32 },
}

impl BackoffPolicy {
    fn initial(&self) -> u32 {
        match self {
            BackoffPolicy::Fixed { cycles } => *cycles,
            BackoffPolicy::Exponential { initial_cycles, .. } => *initial_cycles,
        }
    }

    fn next(&self, current: u32) -> u32 {
        match self {
            BackoffPolicy::Fixed { cycles } => *cycles,
            BackoffPolicy::Exponential { max_cycles, .. } => {
                current.saturating_mul(2).min(*max_cycles)
            }
        }
    }
}

/// Tunables for one scheduler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Consecutive transport failures before entering `Faulted`.
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
    /// Failed attempts after which a one-shot task is dropped.
    #[serde(default = "default_once_retry_limit")]
    pub once_retry_limit: u32,
    /// Probe spacing while `Faulted`.
    #[serde(default = "default_backoff")]
    pub backoff: BackoffPolicy,
}

fn default_fault_threshold() -> u32 {
    3
}

fn default_once_retry_limit() -> u32 {
    5
}

fn default_backoff() -> BackoffPolicy {
    BackoffPolicy::Exponential {
        initial_cycles: 1,
        max_cycles: 32,
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fault_threshold: default_fault_threshold(),
            once_retry_limit: default_once_retry_limit(),
            backoff: default_backoff(),
        }
    }
}

/// Counters accumulated across cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub cycles: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub faults: u64,
    pub probes: u64,
    pub once_tasks_completed: u64,
    pub once_tasks_dropped: u64,
}

/// Cyclic executor binding a protocol definition, a transport, and a store.
pub struct PollScheduler<T, S> {
    definition: ProtocolDefinition,
    transport: T,
    store: S,
    config: SchedulerConfig,
    state: SchedulerState,
    consecutive_failures: u32,
    once_attempts: HashMap<TaskId, u32>,
    current_backoff: u32,
    cycles_until_probe: u32,
    stats: CycleStats,
}

impl<T, S> PollScheduler<T, S>
where
    T: RegisterTransport,
    S: ProcessValueStore,
{
    pub fn new(
        definition: ProtocolDefinition,
        transport: T,
        store: S,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            definition,
            transport,
            store,
            config,
            state: SchedulerState::Idle,
            consecutive_failures: 0,
            once_attempts: HashMap::new(),
            current_backoff: 0,
            cycles_until_probe: 0,
            stats: CycleStats::default(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport_stats(&self) -> crate::transport::TransportStats {
        self.transport.stats()
    }

    /// Mutate the task list between cycles.
    ///
    /// The exclusive borrow guarantees no cycle is in flight while the
    /// definition changes; additions and removals take effect on the next
    /// cycle.
    pub fn definition_mut(&mut self) -> &mut ProtocolDefinition {
        &mut self.definition
    }

    pub fn definition(&self) -> &ProtocolDefinition {
        &self.definition
    }

    /// Stop issuing transport requests until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        info!("scheduler paused");
        self.state = SchedulerState::Paused;
    }

    /// Leave `Paused`. The next cycle runs normally; a broken transport
    /// re-enters `Faulted` through the usual failure counting.
    pub fn resume(&mut self) {
        if self.state == SchedulerState::Paused {
            info!("scheduler resumed");
            self.state = SchedulerState::Idle;
            self.consecutive_failures = 0;
        }
    }

    /// Close the transport and consume the scheduler.
    pub async fn shutdown(mut self) -> PollResult<()> {
        self.transport.close().await
    }

    /// Run one scheduling tick and return the resulting state.
    ///
    /// Every non-paused tick ends by promoting the store's `next` read
    /// values, so a channel that decoded nothing this tick reads as
    /// undefined rather than echoing a stale value.
    pub async fn cycle(&mut self) -> SchedulerState {
        let state = match self.state {
            SchedulerState::Paused => return SchedulerState::Paused,
            SchedulerState::Faulted => self.probe_cycle().await,
            _ => self.run_cycle().await,
        };
        self.store.promote();
        state
    }

    async fn run_cycle(&mut self) -> SchedulerState {
        self.stats.cycles += 1;
        self.state = SchedulerState::Selecting;

        // Writes go out before reads so fresh setpoints reach the device
        // ahead of the cycle's sampling. Each set is already in priority
        // order; tasks run strictly sequentially on the shared transport.
        let selected: Vec<TaskId> = self
            .definition
            .write_tasks()
            .map(|(id, _)| id)
            .chain(self.definition.read_tasks().map(|(id, _)| id))
            .collect();

        for id in selected {
            let Some(task) = self.definition.get(id).cloned() else {
                continue;
            };

            self.state = SchedulerState::Executing;
            let result = task.execute(&mut self.transport, &self.store).await;
            self.state = SchedulerState::Applying;

            match result {
                Ok(()) => {
                    self.stats.tasks_succeeded += 1;
                    self.consecutive_failures = 0;
                    if task.priority() == Priority::Once {
                        self.definition.remove_task(id);
                        self.once_attempts.remove(&id);
                        self.stats.once_tasks_completed += 1;
                        debug!(unit = task.unit(), span = %task.span(), "one-shot task completed");
                    }
                }
                Err(error) => {
                    self.stats.tasks_failed += 1;
                    warn!(
                        unit = task.unit(),
                        span = %task.span(),
                        %error,
                        "task failed"
                    );

                    if task.priority() == Priority::Once {
                        let attempts = self.once_attempts.entry(id).or_insert(0);
                        *attempts += 1;
                        if *attempts >= self.config.once_retry_limit {
                            self.definition.remove_task(id);
                            self.once_attempts.remove(&id);
                            self.stats.once_tasks_dropped += 1;
                            warn!(
                                unit = task.unit(),
                                span = %task.span(),
                                limit = self.config.once_retry_limit,
                                "one-shot task dropped after retry limit"
                            );
                        }
                    }

                    if error.is_transport_error() {
                        self.consecutive_failures += 1;
                        if self.consecutive_failures >= self.config.fault_threshold {
                            self.enter_faulted();
                            return SchedulerState::Faulted;
                        }
                    }
                }
            }
        }

        self.state = SchedulerState::Idle;
        SchedulerState::Idle
    }

    fn enter_faulted(&mut self) {
        self.stats.faults += 1;
        self.current_backoff = self.config.backoff.initial();
        self.cycles_until_probe = self.current_backoff;
        self.state = SchedulerState::Faulted;
        error!(
            failures = self.consecutive_failures,
            backoff_cycles = self.current_backoff,
            "fault threshold reached, halting task selection"
        );
    }

    /// One tick while `Faulted`: count down the backoff, then probe.
    async fn probe_cycle(&mut self) -> SchedulerState {
        if self.cycles_until_probe > 0 {
            self.cycles_until_probe -= 1;
            return SchedulerState::Faulted;
        }

        self.stats.probes += 1;
        match self.transport.probe().await {
            Ok(()) => {
                info!("transport probe succeeded, scheduler recovering");
                self.consecutive_failures = 0;
                self.state = SchedulerState::Idle;
                SchedulerState::Idle
            }
            Err(error) => {
                self.current_backoff = self.config.backoff.next(self.current_backoff);
                self.cycles_until_probe = self.current_backoff;
                warn!(
                    %error,
                    next_probe_in = self.current_backoff,
                    "transport probe failed"
                );
                SchedulerState::Faulted
            }
        }
    }
}
