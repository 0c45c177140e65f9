//! # Vocab Card
//!
//! A daily learning-card service. Once a day it picks one entry that has not
//! been delivered yet from the active content collection (vocabulary, JLPT
//! words, idioms, classical-text fragments or quiz questions), renders it into
//! a card image, and pushes that image to every registered destination.
//!
//! ## Architecture
//!
//! 1. **Collections**: [`collections`] loads raw records through one handler
//!    variant per content type, bound to ids in a [`CollectionRegistry`]
//! 2. **Selection**: [`selection`] picks an undelivered entry; [`progress`]
//!    remembers what was delivered
//! 3. **Rendering**: [`render`] fills an HTML template and rasterizes it
//! 4. **Delivery**: [`delivery`] fans the card out, then deletes it
//! 5. **Scheduling**: [`scheduler`] fires the generate phase (default 07:30)
//!    and the push phase (default 08:00) at a fixed UTC offset
//!
//! [`service::CardService`] ties these together and exposes the manual
//! command surface used by the CLI; [`control`] lets one-shot commands run
//! inside a serving process.
//!
//! [`CollectionRegistry`]: collections::CollectionRegistry

pub mod cli;
pub mod collections;
pub mod config;
pub mod control;
pub mod delivery;
pub mod error;
pub mod models;
pub mod progress;
pub mod render;
pub mod scheduler;
pub mod selection;
pub mod service;
pub mod utils;

pub use error::{Error, Result};
