//! Append-only storage read through a strictly advancing cursor.
//!
//! Beaver triples and shuffle correlation rounds are one-time material. Both are kept in a
//! [ConsumptionArena]; every item can be handed out exactly once and only in order.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Misuse of a [ConsumptionArena].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    /// `index` lies behind the cursor, so the item was already handed out.
    #[error("index {index} was already consumed (cursor at {cursor})")]
    AlreadyConsumed {
        /// Requested index.
        index: usize,
        /// Current cursor.
        cursor: usize,
    },
    /// `index` lies ahead of the cursor.
    #[error("index {index} requested out of order (cursor at {cursor})")]
    OutOfOrder {
        /// Requested index.
        index: usize,
        /// Current cursor.
        cursor: usize,
    },
    /// Fewer items are left than requested.
    #[error("{requested} items requested but only {remaining} remain")]
    Exhausted {
        /// Requested count.
        requested: usize,
        /// Items left behind the cursor.
        remaining: usize,
    },
}

/// Items plus the index of the next unconsumed one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionArena<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> ConsumptionArena<T> {
    /// Wraps freshly generated items; nothing is consumed yet.
    pub fn new(items: Vec<T>) -> Self {
        Self { items, cursor: 0 }
    }

    /// Number of items ever stored.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the arena never held anything.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the next item to be handed out.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Items not consumed yet.
    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> &[T] {
        &self.items
    }

    /// Hands out the next `count` items.
    pub fn take(&mut self, count: usize) -> Result<&[T], CursorError> {
        self.take_at(self.cursor, count)
    }

    /// Hands out `count` items starting at `index`, which must equal the cursor.
    pub fn take_at(&mut self, index: usize, count: usize) -> Result<&[T], CursorError> {
        let cursor = self.cursor;
        if index < cursor {
            return Err(CursorError::AlreadyConsumed { index, cursor });
        }
        if index > cursor {
            return Err(CursorError::OutOfOrder { index, cursor });
        }
        if count > self.remaining() {
            return Err(CursorError::Exhausted {
                requested: count,
                remaining: self.remaining(),
            });
        }

        self.cursor += count;
        Ok(&self.items[index..index + count])
    }
}

impl<T: Zeroize> Zeroize for ConsumptionArena<T> {
    fn zeroize(&mut self) {
        self.items.zeroize();
        self.cursor.zeroize();
    }
}
