#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

mod api;
pub mod config;
pub mod error;
mod logging;
pub mod model;
pub mod recorder;
pub mod store;

pub use config::Config;

use config::{ConfigFairing, StoreFairing};
use logging::LoggerFairing;

/// Build the polls server from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .attach(LoggerFairing)
}

/// A server over an existing store, with a fixed JWT secret.
#[cfg(test)]
pub(crate) fn rocket_for_store(polls: store::Polls) -> Rocket<Build> {
    let figment = rocket::Config::figment().merge(("jwt_secret", "test secret"));
    rocket::custom(figment)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .attach(ConfigFairing)
        .attach(LoggerFairing)
        .manage(polls)
}
