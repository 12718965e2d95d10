//! Session Artifact Cache
//!
//! Keyed by [`SessionKey`](crate::session::SessionKey). Holds the partially
//! built deep-pipeline artifacts so a later turn in the same conversation
//! resumes where the previous build stopped.
//!
//! - Writes merge: a populated field is never overwritten (only `clear`
//!   empties it).
//! - The TTL is fixed when the entry is created; merges do not extend it.
//! - Expired entries read as absent and are evicted on read.

pub mod entry;
pub mod store;

pub use entry::{ArtifactPatch, CacheEntry, Stage};
pub use store::{SessionArtifactCache, SharedArtifactCache, DEFAULT_TTL};
