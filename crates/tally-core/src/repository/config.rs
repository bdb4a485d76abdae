use super::{load, save};
use crate::error::Result;
use crate::model::{Config, CONFIG_KEY};
use crate::storage::{KeyValueStore, Store};

/// Access to the per-installation [`Config`] record.
pub struct ConfigRepository<'s> {
    store: &'s Store,
}

impl<'s> ConfigRepository<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self { store }
    }

    /// The config record, generated on first access.
    pub fn get(&self) -> Result<Config> {
        match load(self.store, CONFIG_KEY) {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => self.store.transaction(|txn| load_or_init(txn)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update(&self, config: &Config) -> Result<()> {
        Ok(save(self.store, CONFIG_KEY, config)?)
    }
}

pub(crate) fn load_or_init<K: KeyValueStore + ?Sized>(kv: &K) -> Result<Config> {
    match load(kv, CONFIG_KEY) {
        Ok(config) => Ok(config),
        Err(e) if e.is_not_found() => {
            let config = Config::generate();
            save(kv, CONFIG_KEY, &config)?;
            tracing::info!(user_key = %config.user_key, "generated installation config");
            Ok(config)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_creates_once() {
        let store = Store::open_memory().unwrap();
        let repo = ConfigRepository::new(&store);
        let first = repo.get().unwrap();
        let second = repo.get().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.key, CONFIG_KEY);
    }

    #[test]
    fn update_persists() {
        let store = Store::open_memory().unwrap();
        let repo = ConfigRepository::new(&store);
        let mut config = repo.get().unwrap();
        config.user_key = "fixed".into();
        repo.update(&config).unwrap();
        assert_eq!(repo.get().unwrap().user_key, "fixed");
    }
}
