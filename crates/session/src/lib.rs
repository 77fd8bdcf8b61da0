//! Durable session persistence for codecrab.
//!
//! A [`SessionRecord`] is the serializable projection of a live session.
//! The [`SessionStore`] writes records off the interactive path through a
//! bounded queue and keeps a lightweight index for listings.

pub mod record;
pub mod store;

pub use record::{IndexEntry, SessionIndex, SessionRecord, summarize_prompt};
pub use store::{SessionStore, StoreConfig};
