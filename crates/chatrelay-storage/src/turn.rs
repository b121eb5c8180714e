//! Turn storage - append-only, per-conversation ordered log of raw turn records.
//!
//! Keys are `(conversation_id, seq)` so a range scan over one conversation
//! yields its turns in append order. Sequence numbers are allocated inside the
//! write transaction that stores the record; redb serialises write
//! transactions, which keeps appends to one conversation strictly ordered.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

const TURNS_TABLE: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("turns");

/// Low-level turn storage with byte-level API
#[derive(Debug, Clone)]
pub struct TurnStorage {
    db: Arc<Database>,
}

impl TurnStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(TURNS_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a record to the end of a conversation's log.
    ///
    /// `build` receives the allocated sequence number and the bytes of the
    /// current last record (if any) and returns the bytes to store.
    pub fn append_raw<F>(&self, conversation_id: &str, build: F) -> Result<(u64, Vec<u8>)>
    where
        F: FnOnce(u64, Option<&[u8]>) -> Result<Vec<u8>>,
    {
        let write_txn = self.db.begin_write()?;
        let stored = {
            let mut table = write_txn.open_table(TURNS_TABLE)?;
            let last = {
                let mut range = table.range((conversation_id, 0u64)..=(conversation_id, u64::MAX))?;
                match range.next_back() {
                    Some(item) => {
                        let (key, value) = item?;
                        Some((key.value().1, value.value().to_vec()))
                    }
                    None => None,
                }
            };

            let seq = last.as_ref().map(|(seq, _)| seq + 1).unwrap_or(0);
            let data = build(seq, last.as_ref().map(|(_, data)| data.as_slice()))?;
            table.insert((conversation_id, seq), data.as_slice())?;
            (seq, data)
        };
        write_txn.commit()?;
        tracing::debug!(conversation_id, seq = stored.0, bytes = stored.1.len(), "Appended turn record");
        Ok(stored)
    }

    /// List a conversation's records in sequence order
    pub fn list_raw(&self, conversation_id: &str) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TURNS_TABLE)?;

        let mut turns = Vec::new();
        for item in table.range((conversation_id, 0u64)..=(conversation_id, u64::MAX))? {
            let (key, value) = item?;
            turns.push((key.value().1, value.value().to_vec()));
        }

        Ok(turns)
    }

    /// Number of records stored for a conversation
    pub fn count(&self, conversation_id: &str) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TURNS_TABLE)?;
        Ok(table
            .range((conversation_id, 0u64)..=(conversation_id, u64::MAX))?
            .count())
    }

    /// Delete every record of a conversation, returning how many were removed
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TURNS_TABLE)?;
            let mut seqs = Vec::new();
            for item in table.range((conversation_id, 0u64)..=(conversation_id, u64::MAX))? {
                let (key, _) = item?;
                seqs.push(key.value().1);
            }
            for seq in &seqs {
                table.remove((conversation_id, *seq))?;
            }
            seqs.len()
        };
        write_txn.commit()?;
        tracing::info!(conversation_id, removed, "Deleted conversation turns");
        Ok(removed)
    }
}
