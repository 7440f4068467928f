use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::engine::{
    client_info::IpEnricher,
    hasher::{Argon2Hasher, CredentialHasher},
    Engine,
};
use crate::error::Result;
use crate::model::{
    api::admin::AdminCredentials,
    db::{admin::NewAdmin, audit::NewAuditEvent},
};
use crate::store::{MemoryStore, MongoStore, Store};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    #[serde(default = "default_settings_cache_ttl")]
    settings_cache_ttl: u64,
    #[serde(default)]
    ip_lookup_url: Option<String>,
    #[serde(default = "default_ip_lookup_timeout_ms")]
    ip_lookup_timeout_ms: u64,
    #[serde(default = "default_brute_force_threshold")]
    brute_force_threshold: u64,
    #[serde(default)]
    admin_username: Option<String>,
    // secrets
    jwt_secret: String,
    #[serde(default)]
    admin_password: Option<String>,
}

fn default_settings_cache_ttl() -> u64 {
    10
}

fn default_ip_lookup_timeout_ms() -> u64 {
    1500
}

fn default_brute_force_threshold() -> u64 {
    5
}

impl Config {
    /// Valid lifetime of auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// How long display reads of the election settings may be cached.
    pub fn settings_cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.settings_cache_ttl)
    }

    /// IP lookup service URL template, with `{ip}` standing for the address.
    pub fn ip_lookup_url(&self) -> Option<&str> {
        self.ip_lookup_url.as_deref()
    }

    pub fn ip_lookup_timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.ip_lookup_timeout_ms)
    }

    /// Failed credential checks for one identity before a warning is logged.
    /// Zero disables the warning.
    pub fn brute_force_threshold(&self) -> u64 {
        self.brute_force_threshold
    }

    /// Credentials of the admin to create when none exist yet.
    pub fn bootstrap_admin(&self) -> Option<AdminCredentials> {
        Some(AdminCredentials {
            username: self.admin_username.clone()?,
            password: self.admin_password.clone()?,
        })
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
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

/// Which store backs the election.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    #[default]
    Mongodb,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    #[serde(default)]
    storage: StorageKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    #[serde(default)]
    db_uri: Option<String>,
}

fn default_db_name() -> String {
    "pemira".to_string()
}

/// A fairing that loads the storage config, connects to the database if
/// needed, performs any setup necessary, and places the `Store` into managed
/// state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load storage config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let store: Store = match config.storage {
            StorageKind::Memory => {
                warn!("Using in-memory storage, all data is lost on shutdown");
                Arc::new(MemoryStore::new())
            }
            StorageKind::Mongodb => {
                let uri = match config.db_uri {
                    Some(uri) => uri,
                    None => {
                        error!("`db_uri` must be set when `storage` is `mongodb`");
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&uri, &config.db_name).await {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                }
            }
        };
        info!("...store online!");

        // Manage the state.
        Ok(rocket.manage(store))
    }
}

/// A fairing that builds the engine on top of the managed `Config` and
/// `Store`, and makes sure at least one admin exists.
#[derive(Default)]
pub struct EngineFairing {
    hasher: Option<Arc<dyn CredentialHasher>>,
}

impl EngineFairing {
    /// Use the given hasher instead of the default Argon2 parameters.
    pub fn with_hasher(hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            hasher: Some(hasher),
        }
    }
}

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Engine",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, store) = match (rocket.state::<Config>(), rocket.state::<Store>()) {
            (Some(config), Some(store)) => (config, store.clone()),
            _ => {
                error!("Engine requires the config and store to be loaded first");
                return Err(rocket);
            }
        };

        let engine = match build_engine(config, store.clone(), self.hasher.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to initialise engine: {e}");
                return Err(rocket);
            }
        };

        if let Err(e) = ensure_admin_exists(config, &store, &engine).await {
            error!("Failed to create bootstrap admin: {e}");
            return Err(rocket);
        }

        Ok(rocket.manage(engine))
    }
}

fn build_engine(
    config: &Config,
    store: Store,
    hasher: Option<Arc<dyn CredentialHasher>>,
) -> Result<Engine> {
    let hasher = match hasher {
        Some(hasher) => hasher,
        None => Arc::new(Argon2Hasher::new()?),
    };
    let enricher = IpEnricher::new(
        config.ip_lookup_url().map(str::to_string),
        config.ip_lookup_timeout(),
    )?;
    Ok(Engine::new(
        store,
        hasher,
        enricher,
        config.settings_cache_ttl(),
        config.brute_force_threshold(),
    ))
}

/// Create the configured bootstrap admin if there are no admins at all.
async fn ensure_admin_exists(config: &Config, store: &Store, engine: &Engine) -> Result<()> {
    if !store.admins().await?.is_empty() {
        return Ok(());
    }
    let credentials = match config.bootstrap_admin() {
        Some(credentials) if credentials.is_acceptable() => credentials,
        Some(_) => {
            warn!("Configured bootstrap admin credentials are not acceptable, skipping");
            return Ok(());
        }
        None => {
            warn!("No admins exist and no bootstrap admin is configured");
            return Ok(());
        }
    };
    let password_hash = engine.credentials.hash(credentials.password).await?;
    let admin = NewAdmin {
        username: credentials.username,
        password_hash,
    };
    let event = NewAuditEvent::admin_action(&admin.username, "bootstrap_admin");
    let admin = store.insert_admin(admin, event).await?;
    info!("Created bootstrap admin {}", admin.username);
    Ok(())
}
