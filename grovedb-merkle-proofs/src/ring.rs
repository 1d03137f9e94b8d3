use std::collections::VecDeque;

use crate::MerkleError;

/// Bounded FIFO queue used by the streaming root folds.
///
/// Capacity is fixed by the proof's element count; exceeding it or popping
/// an empty queue means the proof is malformed.
#[derive(Debug)]
pub(crate) struct RingBuffer<T> {
    slots: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push_back(&mut self, item: T) -> Result<(), MerkleError> {
        if self.slots.len() >= self.capacity {
            return Err(MerkleError::InvalidProof(format!(
                "ring buffer overflow (capacity {})",
                self.capacity
            )));
        }
        self.slots.push_back(item);
        Ok(())
    }

    pub(crate) fn pop_front(&mut self) -> Result<T, MerkleError> {
        self.slots
            .pop_front()
            .ok_or_else(|| MerkleError::InvalidProof("ring buffer underflow".to_string()))
    }

    pub(crate) fn front(&self) -> Option<&T> {
        self.slots.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
