//! Replicated File Index Module
//!
//! Every process keeps its own in-memory list of the files and directories under the
//! storage root. The list is seeded by a walk at startup and afterwards kept aligned with
//! the other processes purely through event bus broadcasts.
//!
//! ## Core Concepts
//! - **Sentinel**: The root directory is stored as an entry with an empty path and depth 0.
//! - **Generation guard**: While the walk runs, reads return nothing and writes are dropped.
//! - **Origin filtering**: Each mutation is broadcast tagged with its origin. Listeners skip
//!   broadcasts they originated, since they already applied them locally.
//!
//! ## Submodules
//! - **`types`**: The `DiscoveredFile` entry and event names.
//! - **`paths`**: Path normalisation, depth and the storage walker.
//! - **`filters`**: `type:` filters used by search.
//! - **`search`**: N-gram similarity ranking.
//! - **`service`**: The `FileIndex` itself.

pub mod filters;
pub mod paths;
pub mod search;
pub mod service;
pub mod types;

pub use service::FileIndex;
pub use types::DiscoveredFile;
