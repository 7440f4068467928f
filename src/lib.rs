#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use config::{ConfigFairing, EngineFairing, StoreFairing};
use logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

/// Assemble the server: configuration, storage, the engine and all routes.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(EngineFairing::default())
        .mount("/", api::routes())
}

/// A server over the given in-memory store, with cheap hashing and no
/// settings cache. Ignores `Rocket.toml` and the environment.
#[cfg(test)]
pub(crate) fn test_rocket(store: store::MemoryStore) -> Rocket<Build> {
    use rocket::figment::Figment;
    use std::sync::Arc;

    let figment = Figment::from(rocket::Config::debug_default())
        .merge(("jwt_secret", "test-secret"))
        .merge(("auth_ttl", 3600))
        .merge(("settings_cache_ttl", 0));
    rocket::custom(figment)
        .attach(ConfigFairing)
        .manage(Arc::new(store) as store::Store)
        .attach(EngineFairing::with_hasher(Arc::new(
            engine::hasher::Argon2Hasher::fast(),
        )))
        .mount("/", api::routes())
}
