//! Module artifact storage for modhost.
//!
//! Every module name owns one directory holding the current archive, a hash
//! sidecar and, while a writer is active, a lock sentinel. Writers are
//! serialized per module through the lock file (which works across
//! processes sharing the same storage root); readers never take the lock.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modstore::{FileModuleStore, ModuleName, ModuleStore, StoreConfig};
//!
//! let store = FileModuleStore::new(StoreConfig::with_base_path("/srv/modules")).unwrap();
//! let name = ModuleName::parse("audio.mixer").unwrap();
//!
//! // Upload: streamed to a staging file, hashed in the same pass, then renamed into place
//! let receipt = store.put(&name, &mut std::fs::File::open("mixer.zip").unwrap()).unwrap();
//! println!("stored {} bytes as {}", receipt.size_bytes, receipt.hash);
//!
//! // Integrity check for a client cache
//! assert!(store.verify_hash(&name, receipt.hash.as_str()).unwrap());
//!
//! // Metadata from the archive's `info` entry, without extracting anything else
//! println!("revision {}", store.get_revision(&name).unwrap());
//! ```
//!
//! # Layout
//!
//! ```text
//! {base_path}/
//! └── audio.mixer/
//!     ├── module.zip
//!     ├── module.hash
//!     └── module.lock      # only while a writer holds it
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod hash;
pub mod lock;
pub mod name;
pub mod staging;
pub mod store;

pub use archive::{ArchiveError, ModuleInfo, Revision, INFO_ENTRY};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use hash::{ContentHash, ContentHasher, HashError, HashingWriter};
pub use lock::{LockError, LockPolicy, ModuleLock};
pub use name::{ModuleName, NameError};
pub use store::{
    ArtifactReader, FileModuleStore, ModuleReference, ModuleState, ModuleStore, PendingPut,
    PutReceipt, RepairReport,
};
