//! # Protocol Definition
//!
//! The ordered collection of tasks the scheduler serves over one transport.
//! Tasks are partitioned by direction into a read set and a write set, each
//! kept in priority order with insertion order breaking ties.
//!
//! Adding a task validates it against every task already present for the
//! same unit and direction: overlapping register spans are rejected at build
//! time, never discovered at runtime. The definition is only mutated between
//! cycles; the scheduler holds it exclusively while a cycle runs.

use crate::error::{PollError, PollResult};
use crate::task::{Priority, ProtocolTask, TaskDirection};

/// Stable handle for a task within one definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone)]
struct ScheduledTask {
    id: TaskId,
    seq: u64,
    task: ProtocolTask,
}

/// Read and write task sets for one bus.
#[derive(Debug, Clone, Default)]
pub struct ProtocolDefinition {
    read_tasks: Vec<ScheduledTask>,
    write_tasks: Vec<ScheduledTask>,
    next_seq: u64,
}

impl ProtocolDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, keeping its direction set in priority order.
    ///
    /// Fails with [`PollError::ScheduleConflict`] when the task's span
    /// overlaps an existing task for the same unit and direction.
    pub fn add_task(&mut self, task: ProtocolTask) -> PollResult<TaskId> {
        let set = match task.direction() {
            TaskDirection::Read => &self.read_tasks,
            TaskDirection::Write => &self.write_tasks,
        };
        for existing in set {
            if existing.task.unit() == task.unit()
                && existing.task.span().overlaps(&task.span())
            {
                return Err(PollError::schedule_conflict(
                    task.unit(),
                    task.span().address,
                    task.span().words,
                ));
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = TaskId(seq);
        let entry = ScheduledTask { id, seq, task };

        let set = match entry.task.direction() {
            TaskDirection::Read => &mut self.read_tasks,
            TaskDirection::Write => &mut self.write_tasks,
        };
        let position = set
            .iter()
            .position(|s| (s.task.priority(), s.seq) > (entry.task.priority(), seq))
            .unwrap_or(set.len());
        set.insert(position, entry);

        Ok(id)
    }

    /// Remove a task by handle. Returns whether it was present.
    pub fn remove_task(&mut self, id: TaskId) -> bool {
        let before = self.read_tasks.len() + self.write_tasks.len();
        self.read_tasks.retain(|s| s.id != id);
        self.write_tasks.retain(|s| s.id != id);
        before != self.read_tasks.len() + self.write_tasks.len()
    }

    pub fn get(&self, id: TaskId) -> Option<&ProtocolTask> {
        self.read_tasks
            .iter()
            .chain(self.write_tasks.iter())
            .find(|s| s.id == id)
            .map(|s| &s.task)
    }

    /// Read tasks in priority order.
    pub fn read_tasks(&self) -> impl Iterator<Item = (TaskId, &ProtocolTask)> {
        self.read_tasks.iter().map(|s| (s.id, &s.task))
    }

    /// Write tasks in priority order.
    pub fn write_tasks(&self) -> impl Iterator<Item = (TaskId, &ProtocolTask)> {
        self.write_tasks.iter().map(|s| (s.id, &s.task))
    }

    pub fn task_count(&self) -> usize {
        self.read_tasks.len() + self.write_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    /// Handles of every task with `Once` priority, in cycle order.
    pub fn once_task_ids(&self) -> Vec<TaskId> {
        self.write_tasks
            .iter()
            .chain(self.read_tasks.iter())
            .filter(|s| s.task.priority() == Priority::Once)
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::RegisterElement;
    use crate::task::ElementBinding;
    use crate::value::ValueType;

    fn read_task(unit: u8, address: u16, priority: Priority) -> ProtocolTask {
        ProtocolTask::read(
            unit,
            priority,
            vec![ElementBinding::new(
                RegisterElement::new(address, ValueType::U32),
                format!("ch{}", address),
            )],
        )
        .unwrap()
    }

    #[test]
    fn test_priority_then_insertion_order() {
        let mut def = ProtocolDefinition::new();
        let low_a = def.add_task(read_task(1, 0, Priority::Low)).unwrap();
        let high = def.add_task(read_task(1, 10, Priority::High)).unwrap();
        let low_b = def.add_task(read_task(1, 20, Priority::Low)).unwrap();

        let order: Vec<TaskId> = def.read_tasks().map(|(id, _)| id).collect();
        assert_eq!(order, vec![high, low_a, low_b]);
    }

    #[test]
    fn test_overlap_rejected_per_unit_and_direction() {
        let mut def = ProtocolDefinition::new();
        def.add_task(read_task(1, 100, Priority::Low)).unwrap();

        // Same unit, same direction, overlapping span.
        let err = def.add_task(read_task(1, 101, Priority::Low));
        assert!(matches!(err, Err(PollError::ScheduleConflict { .. })));

        // Different unit: no conflict.
        def.add_task(read_task(2, 100, Priority::Low)).unwrap();

        // Same span, opposite direction: no conflict.
        let write = ProtocolTask::write(
            1,
            Priority::High,
            vec![ElementBinding::new(
                RegisterElement::new(100, ValueType::U32),
                "setpoint",
            )],
        )
        .unwrap();
        def.add_task(write).unwrap();

        assert_eq!(def.task_count(), 3);
    }

    #[test]
    fn test_remove_task() {
        let mut def = ProtocolDefinition::new();
        let id = def.add_task(read_task(1, 0, Priority::High)).unwrap();
        assert!(def.remove_task(id));
        assert!(!def.remove_task(id));
        assert!(def.is_empty());

        // The freed span can be reused.
        def.add_task(read_task(1, 0, Priority::Low)).unwrap();
    }

    #[test]
    fn test_once_task_ids() {
        let mut def = ProtocolDefinition::new();
        def.add_task(read_task(1, 0, Priority::High)).unwrap();
        let once = def.add_task(read_task(1, 10, Priority::Once)).unwrap();
        assert_eq!(def.once_task_ids(), vec![once]);
    }
}
