//! Bulk operations built on the cursor

use std::collections::HashMap;

use crate::cursor::{Keys, Pairs};
use crate::error::{DbmError, Result};

use super::Dbm;

impl Dbm {
    // =========================================================================
    // Iteration
    // =========================================================================

    /// Lazy iterator over `(key, value)` pairs in storage order
    pub fn iter(&mut self) -> Result<Pairs<'_>> {
        Ok(Pairs::new(self.index()?))
    }

    /// Lazy iterator over keys in storage order
    pub fn keys_iter(&mut self) -> Result<Keys<'_>> {
        Ok(Keys::new(self.index()?))
    }

    pub fn keys(&mut self) -> Result<Vec<Vec<u8>>> {
        self.keys_iter()?.collect()
    }

    pub fn values(&mut self) -> Result<Vec<Vec<u8>>> {
        self.iter()?.map(|pair| pair.map(|(_, v)| v)).collect()
    }

    /// All pairs as an association list
    pub fn to_vec(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.iter()?.collect()
    }

    pub fn to_map(&mut self) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.iter()?.collect()
    }

    pub fn each_pair<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        for pair in self.iter()? {
            let (key, value) = pair?;
            f(&key, &value);
        }
        Ok(())
    }

    pub fn each_key<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        for key in self.keys_iter()? {
            f(&key?);
        }
        Ok(())
    }

    pub fn each_value<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]),
    {
        self.each_pair(|_, value| f(value))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// First key (in storage order) holding `value`
    pub fn key_of(&mut self, value: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let value = value.as_ref();
        for pair in self.iter()? {
            let (k, v) = pair?;
            if v == value {
                return Ok(Some(k));
            }
        }
        Ok(None)
    }

    pub fn contains_value(&mut self, value: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.key_of(value)?.is_some())
    }

    /// Value → key map. When several keys share a value the first one in
    /// storage order is kept.
    pub fn invert(&mut self) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        let mut inverted = HashMap::new();
        for pair in self.iter()? {
            let (key, value) = pair?;
            inverted.entry(value).or_insert(key);
        }
        Ok(inverted)
    }

    /// Pairs matching `pred`
    pub fn select<F>(&mut self, mut pred: F) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut selected = Vec::new();
        for pair in self.iter()? {
            let (key, value) = pair?;
            if pred(&key, &value) {
                selected.push((key, value));
            }
        }
        Ok(selected)
    }

    /// Copy of the contents without the pairs matching `pred`; the file is
    /// not touched
    pub fn reject<F>(&mut self, mut pred: F) -> Result<HashMap<Vec<u8>, Vec<u8>>>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut kept = HashMap::new();
        for pair in self.iter()? {
            let (key, value) = pair?;
            if !pred(&key, &value) {
                kept.insert(key, value);
            }
        }
        Ok(kept)
    }

    // =========================================================================
    // Bulk Mutation
    // =========================================================================

    /// Delete every pair matching `pred`; returns how many were deleted.
    ///
    /// Matches are collected in one complete pass before anything is
    /// deleted, so removals never disturb the traversal.
    pub fn delete_if<F>(&mut self, mut pred: F) -> Result<usize>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        self.try_delete_if(|key, value| Ok::<_, DbmError>(pred(key, value)))
    }

    /// Like [`Dbm::delete_if`] with a fallible predicate. A predicate error
    /// aborts before any deletion and is returned as is.
    pub fn try_delete_if<F, E>(&mut self, mut pred: F) -> std::result::Result<usize, E>
    where
        F: FnMut(&[u8], &[u8]) -> std::result::Result<bool, E>,
        E: From<DbmError>,
    {
        self.writer()?;

        let mut doomed = Vec::new();
        for pair in self.iter()? {
            let (key, value) = pair?;
            if pred(&key, &value)? {
                doomed.push(key);
            }
        }

        let index = self.writer()?;
        let mut deleted = 0;
        for key in &doomed {
            if index.delete(key)? {
                deleted += 1;
            }
        }
        self.note_deleted(deleted);

        tracing::debug!("delete_if removed {} of {} matches", deleted, doomed.len());
        Ok(deleted)
    }

    /// Delete every record
    pub fn clear(&mut self) -> Result<()> {
        self.writer()?;
        self.len_cache = None;
        let index = self.writer()?;
        // Each pass deletes a key only after capturing its successor; keys
        // shifted behind the walk are picked up by the next pass
        while let Some(first) = index.first_key()? {
            let mut key = Some(first);
            while let Some(current) = key {
                key = index.next_key(&current)?;
                index.delete(&current)?;
            }
        }
        self.len_cache = Some(0);
        self.cursor.reset();
        Ok(())
    }

    /// Remove and return the first pair in storage order
    pub fn shift(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let index = self.writer()?;
        let Some(key) = index.first_key()? else {
            return Ok(None);
        };
        let Some(value) = index.fetch(&key)? else {
            return Ok(None);
        };
        if index.delete(&key)? {
            self.note_deleted(1);
        }
        Ok(Some((key, value)))
    }

    /// Store every pair
    pub fn update<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        for (key, value) in pairs {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Clear, then store every pair
    pub fn replace<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.clear()?;
        self.update(pairs)
    }
}
