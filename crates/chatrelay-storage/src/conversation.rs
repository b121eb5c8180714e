//! Conversation storage - byte-level API for conversation persistence.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::sync::Arc;

const CONVERSATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("conversations");

/// Low-level conversation storage with byte-level API
#[derive(Debug, Clone)]
pub struct ConversationStorage {
    db: Arc<Database>,
}

impl ConversationStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(CONVERSATIONS_TABLE)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Store raw conversation data
    pub fn put_raw(&self, id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CONVERSATIONS_TABLE)?;
            table.insert(id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read-modify-write a conversation inside one write transaction.
    ///
    /// `update` receives the current bytes and returns the replacement, or
    /// `None` to leave the record untouched. Returns whether a write happened.
    pub fn update_raw<F>(&self, id: &str, update: F) -> Result<bool>
    where
        F: FnOnce(&[u8]) -> Result<Option<Vec<u8>>>,
    {
        let write_txn = self.db.begin_write()?;
        let written = {
            let mut table = write_txn.open_table(CONVERSATIONS_TABLE)?;
            let current = match table.get(id)? {
                Some(data) => data.value().to_vec(),
                None => return Ok(false),
            };
            match update(&current)? {
                Some(next) => {
                    table.insert(id, next.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        if !written {
            tracing::debug!(conversation_id = id, "Conversation update skipped");
        }
        Ok(written)
    }

    /// Get raw conversation data by ID
    pub fn get_raw(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;

        if let Some(data) = table.get(id)? {
            Ok(Some(data.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// List all raw conversation data
    pub fn list_raw(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;

        let mut conversations = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            conversations.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(conversations)
    }

    /// Check if conversation exists
    pub fn exists(&self, id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;
        Ok(table.get(id)?.is_some())
    }

    /// Count stored conversations
    pub fn count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CONVERSATIONS_TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Delete conversation by ID
    pub fn delete(&self, id: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(CONVERSATIONS_TABLE)?;
            table.remove(id)?.is_some()
        };
        write_txn.commit()?;
        if existed {
            tracing::info!(conversation_id = id, "Deleted conversation");
        }
        Ok(existed)
    }
}
