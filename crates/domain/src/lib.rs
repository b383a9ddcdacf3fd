//! # devicekit-domain
//!
//! Pure domain model for the devicekit device/driver contract.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions
//! - Define **device descriptors** (what a pairable or persisted device looks like)
//! - Define **device data** (pairing identity) and its equality predicate
//! - Define **settings**, **store**, **energy** and capability value types
//! - Define **availability** and **images** attached to devices
//! - Define **discovery results** and how successive sightings are classified
//! - Define the **app manifest** describing drivers and discovery strategies
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It never imports from `app`, adapters, or async/IO crates.
//! The host boundary is expressed as a trait in the `app` crate (port).

pub mod error;
pub mod id;

pub mod availability;
pub mod device;
pub mod device_data;
pub mod discovery;
pub mod image;
pub mod manifest;
pub mod settings;
pub mod value;
