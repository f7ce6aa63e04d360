//! Iteration Cursor
//!
//! Walks every key once in storage order: directory order, then each
//! bucket's slots from its walk start. A cursor remembers where its last
//! key was, so deleting that key before advancing does not lose the rest
//! of the traversal.

use crate::error::Result;
use crate::index::{HashIndex, Position};

#[derive(Debug, Clone, Default)]
enum CursorState {
    #[default]
    Unstarted,
    At {
        position: Position,
        key: Vec<u8>,
    },
    Exhausted,
}

/// Traversal state over a [`HashIndex`]
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    state: CursorState,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart from the beginning and return the first key
    pub fn first(&mut self, index: &mut HashIndex) -> Result<Option<Vec<u8>>> {
        let found = index.first_entry()?;
        Ok(self.settle(found))
    }

    /// Advance past the key last returned
    pub fn next(&mut self, index: &mut HashIndex) -> Result<Option<Vec<u8>>> {
        let (position, key) = match &self.state {
            CursorState::Unstarted => return self.first(index),
            CursorState::Exhausted => return Ok(None),
            CursorState::At { position, key } => (*position, key.clone()),
        };

        let found = if index.key_at(&position)?.as_deref() == Some(key.as_slice()) {
            index.entry_after(&position)?
        } else if index.is_current(&position) {
            // The key was deleted. Removal only pulls entries from later in
            // the bucket walk into its slot, never ones already returned.
            index.entry_at(&position)?
        } else {
            match index.position_of(&key)? {
                Some(moved) => index.entry_after(&moved)?,
                None => index.entry_at(&position)?,
            }
        };
        Ok(self.settle(found))
    }

    /// Place the cursor on `key`. Returns false (and resets) when the key
    /// is not stored.
    pub fn seek(&mut self, index: &mut HashIndex, key: &[u8]) -> Result<bool> {
        match index.position_of(key)? {
            Some(position) => {
                self.state = CursorState::At {
                    position,
                    key: key.to_vec(),
                };
                Ok(true)
            }
            None => {
                self.reset();
                Ok(false)
            }
        }
    }

    /// Key the cursor is on
    pub fn current(&self) -> Option<&[u8]> {
        match &self.state {
            CursorState::At { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match &self.state {
            CursorState::At { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    pub fn reset(&mut self) {
        self.state = CursorState::Unstarted;
    }

    fn settle(&mut self, found: Option<(Position, Vec<u8>)>) -> Option<Vec<u8>> {
        match found {
            Some((position, key)) => {
                self.state = CursorState::At {
                    position,
                    key: key.clone(),
                };
                Some(key)
            }
            None => {
                self.state = CursorState::Exhausted;
                None
            }
        }
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Iterator over keys. Stops after the first error.
pub struct Keys<'a> {
    index: &'a mut HashIndex,
    cursor: Cursor,
    failed: bool,
}

impl<'a> Keys<'a> {
    pub(crate) fn new(index: &'a mut HashIndex) -> Self {
        Self {
            index,
            cursor: Cursor::new(),
            failed: false,
        }
    }
}

impl Iterator for Keys<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.cursor.next(self.index) {
            Ok(key) => key.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over `(key, value)` pairs. Stops after the first error.
pub struct Pairs<'a> {
    index: &'a mut HashIndex,
    cursor: Cursor,
    failed: bool,
}

impl<'a> Pairs<'a> {
    pub(crate) fn new(index: &'a mut HashIndex) -> Self {
        Self {
            index,
            cursor: Cursor::new(),
            failed: false,
        }
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(key) = self.cursor.next(self.index)? else {
            return Ok(None);
        };
        let value = match self.cursor.position() {
            Some(position) => self.index.value_at(&position)?,
            None => None,
        };
        match value {
            Some(value) => Ok(Some((key, value))),
            None => Ok(self.index.fetch(&key)?.map(|value| (key, value))),
        }
    }
}

impl Iterator for Pairs<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(pair) => pair.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
