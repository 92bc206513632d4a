#[macro_use]
extern crate slog;

pub mod address;
pub mod config;
pub mod document;
pub mod error;
pub mod leases;
pub mod manager;
pub mod reservations;
pub mod store;
pub mod transaction;
pub mod web;

pub use error::{Error, Result};
