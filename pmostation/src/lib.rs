//! # PMOStation
//!
//! Common traits and types for station-based track sources.
//!
//! A *station* is a named, provider-defined continuous source of tracks
//! (internet radio channels, personalized stations, ...). This crate provides
//! the foundational abstractions consumed by the playback engine:
//!
//! - [`Track`]: immutable track descriptor as produced by a catalog.
//! - [`StationProvider`]: async trait every concrete catalog client
//!   implements (track batches, stream resolution, feedback, ratings).
//! - [`ProviderError`]: error taxonomy shared by provider implementations.
//!
//! Concrete clients live in their own crates and are deliberately out of
//! scope here; the playback engine only ever depends on this seam.

pub mod api;
pub mod error;
pub mod track;

pub use api::StationProvider;
pub use error::{ProviderError, Result};
pub use track::{Credentials, StationId, Track, TrackId};
