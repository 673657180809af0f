//! Query/mutation cache.
//!
//! Wraps every server resource in a cached, revalidating query keyed by a
//! [`QueryKey`]:
//!
//! - **Queries** serve fresh entries from memory and de-duplicate concurrent
//!   fetches of the same key into one network call.
//! - **Mutations** run once and invalidate every query under the key prefixes
//!   they declare before resolving.
//! - **Handles** (`use_query`, `use_infinite_query`, `use_mutation`) publish
//!   state changes through `tokio::sync::watch` channels and keep their
//!   entries alive against garbage collection.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! stale_time_ms = 30000
//! gc_time_ms = 300000
//! max_entries = 512
//! # ... see config.rs for all options
//! ```

mod client;
mod config;
mod entry;
mod error;
mod handle;
mod infinite;
mod inflight;
mod keys;
mod lock;
mod mutation;
mod notice;
mod registry;
mod store;

pub use client::QueryClient;
pub use config::{CacheConfig, MAX_RETRY_DELAY};
pub use entry::{Epoch, QueryOptions, QueryState, QueryStatus, Snapshot};
pub use error::QueryError;
pub use handle::QueryHandle;
pub use infinite::{FetchNext, InfiniteData, InfiniteQueryHandle, Paginated};
pub use keys::QueryKey;
pub use mutation::{MutationDescriptor, MutationHandle, MutationState};
pub use notice::{Notice, NoticeLevel};
