//! Typed repositories over the key/value store.
//!
//! Repositories hold no state beyond a borrow of the [`Store`]. The generic
//! [`Repository`] provides CRUD for every [`Entity`]; entity-specific
//! queries live in inherent impls next to it (`block.rs`, `catalog.rs`,
//! `goal.rs`). The two singletons have their own repositories because they
//! use fixed keys and are created lazily.

pub(crate) mod active;
mod block;
mod catalog;
pub(crate) mod config;
mod goal;

pub use active::ActiveRepository;
pub use config::ConfigRepository;

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, UserError};
use crate::model::{entity_key, entity_prefix, Block, Entity, Goal, Project, Task};
use crate::notify::RetryableNotification;
use crate::storage::{KeyValueStore, Store, StoreError};

pub type BlockRepo<'s> = Repository<'s, Block>;
pub type ProjectRepo<'s> = Repository<'s, Project>;
pub type TaskRepo<'s> = Repository<'s, Task>;
pub type GoalRepo<'s> = Repository<'s, Goal>;
pub type NotificationRepo<'s> = Repository<'s, RetryableNotification>;

/// CRUD over the records of one entity type.
pub struct Repository<'s, E> {
    store: &'s Store,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Repository<'_, E> {}

impl<'s, E: Entity> Repository<'s, E> {
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Store a new record. Unique entities fail if the key is taken.
    pub fn create(&self, entity: &E) -> Result<()> {
        create_in(self.store, entity)
    }

    /// Fetch by natural id (the key without the type prefix).
    pub fn get(&self, id: &str) -> Result<E> {
        self.get_by_key(&entity_key::<E>(id))
    }

    /// Fetch by full store key.
    pub fn get_by_key(&self, key: &str) -> Result<E> {
        Ok(load(self.store, key)?)
    }

    /// Like [`Repository::get`], with absence as `None`.
    pub fn find(&self, id: &str) -> Result<Option<E>> {
        self.find_by_key(&entity_key::<E>(id))
    }

    pub fn find_by_key(&self, key: &str) -> Result<Option<E>> {
        match load(self.store, key) {
            Ok(entity) => Ok(Some(entity)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the stored record. No concurrency check is made.
    pub fn update(&self, entity: &E) -> Result<()> {
        Ok(save(self.store, entity.key(), entity)?)
    }

    /// Remove by natural id. Missing records are not an error.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.delete_by_key(&entity_key::<E>(id))
    }

    pub fn delete_by_key(&self, key: &str) -> Result<()> {
        self.store.delete(key)?;
        tracing::debug!(key, "deleted");
        Ok(())
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.store.exists(&entity_key::<E>(id))?)
    }

    /// Every record of this type. Order is not meaningful.
    pub fn list(&self) -> Result<Vec<E>> {
        Ok(list_in(self.store)?)
    }
}

pub(crate) fn load<E, K>(kv: &K, key: &str) -> Result<E, StoreError>
where
    E: DeserializeOwned,
    K: KeyValueStore + ?Sized,
{
    let bytes = kv.get(key)?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn save<E, K>(kv: &K, key: &str, value: &E) -> Result<(), StoreError>
where
    E: Serialize,
    K: KeyValueStore + ?Sized,
{
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })?;
    kv.set(key, &bytes)
}

pub(crate) fn list_in<E, K>(kv: &K) -> Result<Vec<E>, StoreError>
where
    E: Entity,
    K: KeyValueStore + ?Sized,
{
    kv.scan_prefix(&entity_prefix::<E>())?
        .into_iter()
        .map(|(key, bytes)| {
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Codec { key, source })
        })
        .collect()
}

pub(crate) fn create_in<E, K>(kv: &K, entity: &E) -> Result<()>
where
    E: Entity,
    K: KeyValueStore + ?Sized,
{
    let key = entity.key();
    if !E::UNIQUE {
        save(kv, key, entity)?;
        return Ok(());
    }

    let bytes = serde_json::to_vec(entity).map_err(|source| StoreError::Codec {
        key: key.to_string(),
        source,
    })?;
    match kv.insert_new(key, &bytes) {
        Ok(()) => {
            tracing::debug!(key, "created");
            Ok(())
        }
        Err(StoreError::KeyExists { key }) => {
            let id = key.split_once(':').map_or(key.as_str(), |(_, id)| id);
            Err(UserError::from_code(E::EXISTS_CODE)
                .with_detail(id)
                .with_field(E::PREFIX, id)
                .into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Return the stored record under `fresh`'s key, or store `fresh`.
/// The flag is `true` when `fresh` was stored.
pub(crate) fn get_or_insert<E, K>(kv: &K, fresh: E) -> Result<(E, bool)>
where
    E: Entity,
    K: KeyValueStore + ?Sized,
{
    match load::<E, _>(kv, fresh.key()) {
        Ok(existing) => Ok((existing, false)),
        Err(e) if e.is_not_found() => {
            save(kv, fresh.key(), &fresh)?;
            tracing::debug!(key = fresh.key(), "created");
            Ok((fresh, true))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, ErrorCode};
    use crate::model::{GoalType, Task};

    #[test]
    fn project_roundtrip() {
        let store = Store::open_memory().unwrap();
        let repo = ProjectRepo::new(&store);
        let project = Project::new("website", "Website").unwrap();
        repo.create(&project).unwrap();
        assert_eq!(repo.get_by_key(&project.key).unwrap(), project);
        assert_eq!(repo.get("website").unwrap(), project);
    }

    #[test]
    fn task_roundtrip() {
        let store = Store::open_memory().unwrap();
        let repo = TaskRepo::new(&store);
        let task = Task::new("website", "design", "Design").unwrap();
        repo.create(&task).unwrap();
        assert_eq!(repo.get_by_key(&task.key).unwrap(), task);
        assert_eq!(repo.get(&Task::natural_id("website", "design")).unwrap(), task);
    }

    #[test]
    fn goal_and_block_roundtrip() {
        let store = Store::open_memory().unwrap();
        let goal = Goal::new("website", GoalType::Weekly, chrono::Duration::hours(10)).unwrap();
        GoalRepo::new(&store).create(&goal).unwrap();
        assert_eq!(GoalRepo::new(&store).get_by_key(&goal.key).unwrap(), goal);

        let mut block = Block::new("owner", "website", "design", "note", chrono::Utc::now());
        block.close(block.timestamp_start + chrono::Duration::minutes(5)).unwrap();
        BlockRepo::new(&store).create(&block).unwrap();
        assert_eq!(BlockRepo::new(&store).get_by_key(&block.key).unwrap(), block);
        assert_eq!(BlockRepo::new(&store).get(block.id()).unwrap(), block);
    }

    #[test]
    fn duplicate_project_is_a_collision() {
        let store = Store::open_memory().unwrap();
        let repo = ProjectRepo::new(&store);
        repo.create(&Project::new("website", "A").unwrap()).unwrap();
        let err = repo.create(&Project::new("website", "B").unwrap()).unwrap_err();
        match err {
            CoreError::User(e) => assert_eq!(e.code, Some(ErrorCode::ProjectExists)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(repo.get("website").unwrap().display_name, "A");
    }

    #[test]
    fn same_task_sid_in_different_projects() {
        let store = Store::open_memory().unwrap();
        let repo = TaskRepo::new(&store);
        repo.create(&Task::new("website", "design", "").unwrap()).unwrap();
        repo.create(&Task::new("app", "design", "").unwrap()).unwrap();
        assert_eq!(repo.list().unwrap().len(), 2);
    }

    #[test]
    fn missing_get_is_not_found_and_delete_is_idempotent() {
        let store = Store::open_memory().unwrap();
        let repo = ProjectRepo::new(&store);
        assert!(repo.get("ghost").unwrap_err().is_not_found());
        assert!(repo.find("ghost").unwrap().is_none());
        repo.delete("ghost").unwrap();

        repo.create(&Project::new("website", "").unwrap()).unwrap();
        repo.delete("website").unwrap();
        repo.delete("website").unwrap();
        assert!(!repo.exists("website").unwrap());
    }

    #[test]
    fn update_overwrites() {
        let store = Store::open_memory().unwrap();
        let repo = ProjectRepo::new(&store);
        let mut project = Project::new("website", "Old").unwrap();
        repo.create(&project).unwrap();
        project.display_name = "New".into();
        repo.update(&project).unwrap();
        assert_eq!(repo.get("website").unwrap().display_name, "New");
    }

    #[test]
    fn list_only_sees_own_prefix() {
        let store = Store::open_memory().unwrap();
        ProjectRepo::new(&store)
            .create(&Project::new("website", "").unwrap())
            .unwrap();
        TaskRepo::new(&store)
            .create(&Task::new("website", "design", "").unwrap())
            .unwrap();
        assert_eq!(ProjectRepo::new(&store).list().unwrap().len(), 1);
        assert_eq!(TaskRepo::new(&store).list().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_record_is_a_codec_error() {
        let store = Store::open_memory().unwrap();
        store.set("project:broken", b"not json").unwrap();
        let err = ProjectRepo::new(&store).get("broken").unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Codec { .. })));
    }
}
