//! Core data models for the image sharing service.
//!
//! `ImageRecord` maps to the `images` table via `sqlx::FromRow` and serializes
//! as camelCase JSON via `serde`.

pub mod image;
pub mod upload;
