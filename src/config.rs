use mongodb::{Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::mongodb::ensure_indexes_exist;
use crate::store::{MemoryStore, MongoStore, Polls};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default = "default_vote_attempts")]
    vote_attempts: u32,
    #[serde(default = "default_lock_timeout_ms")]
    lock_timeout_ms: u64,
    #[serde(default = "default_index_size")]
    index_size: usize,
    // secrets
    jwt_secret: String,
}

fn default_vote_attempts() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    500
}

fn default_index_size() -> usize {
    10
}

impl Config {
    /// Secret key used to sign and verify JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// How many times a contended vote is attempted before giving up.
    /// Never less than one.
    pub fn vote_attempts(&self) -> u32 {
        self.vote_attempts.max(1)
    }

    /// How long the in-memory store waits for a vote's key lock.
    pub fn lock_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_timeout_ms)
    }

    /// Number of questions on the index listing.
    pub fn index_size(&self) -> usize {
        self.index_size
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the store fairing and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which [`crate::store::PollStore`] backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Mongodb,
    Memory,
}

/// Configuration for persistence.
#[derive(Deserialize)]
struct StoreConfig {
    store: StoreKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: Option<String>,
}

fn default_db_name() -> String {
    "polls".to_string()
}

/// A fairing that loads the store config and places a [`Polls`] handle into
/// managed state. Must be attached after [`ConfigFairing`].
///
/// For MongoDB it also connects, ensures the required indexes exist, and
/// manages both the `Client` and the `Database`.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Poll store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        match config.store {
            StoreKind::Memory => {
                let Some(app_config) = rocket.state::<Config>() else {
                    error!("Application config must be loaded before the store");
                    return Err(rocket);
                };
                warn!("Using the in-memory store; nothing will survive a restart");
                let store = MemoryStore::new(app_config.lock_timeout());
                rocket = rocket.manage(Polls::new(store));
            }
            StoreKind::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set to use the MongoDB store");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                let (client, db) = match connect(&db_uri, &config.db_name).await {
                    Ok(connection) => connection,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                info!("...database connection online!");

                // Manage the state.
                let polls = Polls::new(MongoStore::new(client.clone(), db.clone()));
                rocket = rocket.manage(client).manage(db).manage(polls);
            }
        }
        Ok(rocket)
    }
}

/// Connect to MongoDB and make sure the collections are indexed.
pub async fn connect(
    db_uri: &str,
    db_name: &str,
) -> Result<(MongoClient, Database), mongodb::error::Error> {
    let client = MongoClient::with_uri_str(db_uri).await?;
    let db = client.database(db_name);
    ensure_indexes_exist(&db).await?;
    Ok((client, db))
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Config {
        pub fn example() -> Self {
            Self::example_with_secret("test secret")
        }

        pub fn example_with_secret(secret: &str) -> Self {
            Self {
                vote_attempts: default_vote_attempts(),
                lock_timeout_ms: default_lock_timeout_ms(),
                index_size: default_index_size(),
                jwt_secret: secret.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rocket::figment::{providers::Serialized, Figment};

    use super::*;

    #[test]
    fn defaults_fill_unset_keys() {
        let figment = Figment::from(Serialized::default("jwt_secret", "shh"));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.jwt_secret(), b"shh");
        assert_eq!(config.vote_attempts(), 3);
        assert_eq!(config.lock_timeout(), std::time::Duration::from_millis(500));
        assert_eq!(config.index_size(), 10);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let figment = Figment::from(Serialized::default("jwt_secret", "shh"))
            .merge(Serialized::default("vote_attempts", 0));
        let config: Config = figment.extract().unwrap();
        assert_eq!(config.vote_attempts(), 1);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let figment = Figment::from(Serialized::default("index_size", 5));
        assert!(figment.extract::<Config>().is_err());
    }

    #[test]
    fn store_kind_parses_lowercase() {
        let figment = Figment::from(Serialized::default("store", "memory"));
        let config: StoreConfig = figment.extract().unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.db_name, "polls");
        assert!(config.db_uri.is_none());
    }
}
