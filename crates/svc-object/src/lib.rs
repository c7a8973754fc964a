//! Reference-counted object model for the services daemon.
//!
//! Every entity the daemon keeps in memory (channels, accounts, bots, bans)
//! is backed by an object envelope living in a [`Registry`]. The envelope
//! carries a strong reference count, an optional custom destructor, ordered
//! metadata and a private-data side table.
//!
//! # Key Types
//!
//! - [`Registry`] -- owns every envelope; `init`/`acquire`/`sink`/`release`/`dispose`
//! - [`ObjectRef`] -- copyable handle to an envelope
//! - [`Metadata`] -- interned name plus owned value, one per case-insensitive name
//! - [`MetadataPool`] -- block-reserving record pool backing metadata
//! - [`StringInterner`] -- shared, counted metadata names
//!
//! # Threading
//!
//! A registry is single-owner state. All mutation goes through `&mut
//! Registry`, and the shared `Rc` strings keep it on the thread that built
//! it.

pub mod config;
pub mod error;
pub mod interner;
pub mod metadata;
pub mod object;
pub mod pool;
pub mod private;
pub mod registry;

pub use config::RegistryConfig;
pub use error::{ObjectError, ObjectResult};
pub use interner::StringInterner;
pub use metadata::Metadata;
pub use object::{Destructor, ObjectRef, DISPOSING};
pub use pool::{MetadataKey, MetadataPool};
pub use registry::Registry;
