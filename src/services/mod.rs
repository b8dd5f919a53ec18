//! Upload workflow, live feed and detail lookup, plus the storage backends
//! they run on.

pub mod detail_view;
pub mod id_generator;
pub mod metadata_store;
pub mod object_store;
pub mod recent_feed;
pub mod upload_service;
