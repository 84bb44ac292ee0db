//! Bounded FIFO of commands submitted while the scheduler is busy

use crate::task::QueuedCommand;
use conductor_foundation::{Error, Result};
use std::collections::VecDeque;

/// Default number of waiting commands
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct CommandQueue {
    entries: VecDeque<QueuedCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append a command, returning its 1-based position
    pub fn push(&mut self, command: QueuedCommand) -> Result<usize> {
        if self.entries.len() >= self.capacity {
            return Err(Error::QueueFull(format!(
                "Command queue is full ({} waiting)",
                self.capacity
            )));
        }
        self.entries.push_back(command);
        Ok(self.entries.len())
    }

    pub fn pop(&mut self) -> Option<QueuedCommand> {
        self.entries.pop_front()
    }

    /// Drop a waiting command by task id
    pub fn remove(&mut self, task_id: &str) -> Option<QueuedCommand> {
        let index = self.entries.iter().position(|c| c.task_id == task_id)?;
        self.entries.remove(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.task_id.clone()).collect()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
