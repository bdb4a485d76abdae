//! Active-tracking state machine.
//!
//! The machine has two states, Idle (`active_block_key` empty) and Tracking.
//! Every transition is one read-modify-write of the `active` record inside a
//! single store transaction, so concurrent processes serialize on whole
//! transitions and the record never holds half of one.

use super::{load, save, BlockRepo};
use crate::error::Result;
use crate::model::{ActiveBlock, Block, ACTIVE_KEY};
use crate::storage::{KeyValueStore, Store};

pub struct ActiveRepository<'s> {
    store: &'s Store,
}

impl<'s> ActiveRepository<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// Current pointers. The record is created on first access.
    pub fn get(&self) -> Result<ActiveBlock> {
        match load(self.store, ACTIVE_KEY) {
            Ok(active) => Ok(active),
            Err(e) if e.is_not_found() => self.store.transaction(|txn| load_or_init(txn)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_tracking(&self) -> Result<bool> {
        Ok(self.get()?.is_tracking())
    }

    /// Make `block_key` active. A running block becomes the previous one.
    pub fn set_active(&self, block_key: &str) -> Result<ActiveBlock> {
        self.store.transaction(|txn| set_active_in(txn, block_key))
    }

    /// Return to Idle. When already Idle nothing changes and the previous
    /// pointer survives.
    pub fn clear_active(&self) -> Result<ActiveBlock> {
        self.store.transaction(|txn| clear_active_in(txn))
    }

    /// The running block, or `None` when idle or when the pointer is stale.
    pub fn get_active_block(&self, blocks: &BlockRepo<'_>) -> Result<Option<Block>> {
        let active = self.get()?;
        resolve(blocks, &active.active_block_key)
    }

    /// The block tracked before the current one, if it still exists.
    pub fn get_previous_block(&self, blocks: &BlockRepo<'_>) -> Result<Option<Block>> {
        let active = self.get()?;
        resolve(blocks, &active.previous_block_key)
    }
}

fn resolve(blocks: &BlockRepo<'_>, key: &str) -> Result<Option<Block>> {
    if key.is_empty() {
        return Ok(None);
    }
    let block = blocks.find_by_key(key)?;
    if block.is_none() {
        tracing::debug!(key, "pointer references a deleted block");
    }
    Ok(block)
}

pub(crate) fn load_or_init<K: KeyValueStore + ?Sized>(kv: &K) -> Result<ActiveBlock> {
    match load(kv, ACTIVE_KEY) {
        Ok(active) => Ok(active),
        Err(e) if e.is_not_found() => {
            let active = ActiveBlock::default();
            save(kv, ACTIVE_KEY, &active)?;
            Ok(active)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn set_active_in<K: KeyValueStore + ?Sized>(kv: &K, block_key: &str) -> Result<ActiveBlock> {
    let mut active = load_or_init(kv)?;
    active.activate(block_key);
    save(kv, ACTIVE_KEY, &active)?;
    tracing::info!(
        active = %active.active_block_key,
        previous = %active.previous_block_key,
        "tracking"
    );
    Ok(active)
}

pub(crate) fn clear_active_in<K: KeyValueStore + ?Sized>(kv: &K) -> Result<ActiveBlock> {
    let mut active = load_or_init(kv)?;
    if active.clear() {
        save(kv, ACTIVE_KEY, &active)?;
        tracing::info!(previous = %active.previous_block_key, "idle");
    }
    Ok(active)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn starts_idle_and_is_created_lazily() {
        let store = Store::open_memory().unwrap();
        assert!(!store.exists(ACTIVE_KEY).unwrap());
        let repo = ActiveRepository::new(&store);
        assert!(!repo.is_tracking().unwrap());
        assert!(store.exists(ACTIVE_KEY).unwrap());
    }

    #[test]
    fn set_active_rotates() {
        let store = Store::open_memory().unwrap();
        let repo = ActiveRepository::new(&store);
        repo.set_active("b1").unwrap();
        repo.set_active("b2").unwrap();
        let active = repo.get().unwrap();
        assert_eq!(active.active_block_key, "b2");
        assert_eq!(active.previous_block_key, "b1");
    }

    #[test]
    fn clear_active_moves_to_previous() {
        let store = Store::open_memory().unwrap();
        let repo = ActiveRepository::new(&store);
        repo.set_active("b1").unwrap();
        repo.clear_active().unwrap();
        let active = repo.get().unwrap();
        assert_eq!(active.active_block_key, "");
        assert_eq!(active.previous_block_key, "b1");
        assert!(!repo.is_tracking().unwrap());
    }

    #[test]
    fn clear_while_idle_keeps_previous() {
        let store = Store::open_memory().unwrap();
        let repo = ActiveRepository::new(&store);
        repo.set_active("b1").unwrap();
        repo.clear_active().unwrap();
        repo.clear_active().unwrap();
        assert_eq!(repo.get().unwrap().previous_block_key, "b1");
    }

    #[test]
    fn pointers_resolve_through_block_repo() {
        let store = Store::open_memory().unwrap();
        let blocks = BlockRepo::new(&store);
        let repo = ActiveRepository::new(&store);
        assert!(repo.get_active_block(&blocks).unwrap().is_none());

        let first = Block::new("owner", "web", "", "", Utc::now());
        let second = Block::new("owner", "web", "", "", Utc::now());
        blocks.create(&first).unwrap();
        blocks.create(&second).unwrap();
        repo.set_active(&first.key).unwrap();
        repo.set_active(&second.key).unwrap();

        assert_eq!(repo.get_active_block(&blocks).unwrap(), Some(second));
        assert_eq!(repo.get_previous_block(&blocks).unwrap(), Some(first));
    }

    #[test]
    fn stale_pointer_resolves_to_none() {
        let store = Store::open_memory().unwrap();
        let blocks = BlockRepo::new(&store);
        let repo = ActiveRepository::new(&store);
        let block = Block::new("owner", "web", "", "", Utc::now());
        blocks.create(&block).unwrap();
        repo.set_active(&block.key).unwrap();
        blocks.delete_by_key(&block.key).unwrap();

        assert!(repo.is_tracking().unwrap());
        assert!(repo.get_active_block(&blocks).unwrap().is_none());
    }
}
