//! RTG Refit sync engine
//!
//! Local, in-memory projection of a project's remote collections: kept live
//! by push feeds, mutated optimistically with rollback, backed by a
//! deterministic demo dataset when nobody is signed in, and reshaped into
//! zone-scoped views for the editors.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod executor;
pub mod fallback;
pub mod gateway;
pub mod multiplexer;
pub mod notices;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use aggregator::{aggregate, flatten, UnitProgress, ValidationState, ZoneAggregator, ZoneView};
pub use cache::{CachedSnapshot, LocalCache};
pub use config::SyncConfig;
pub use executor::{ImageUpload, MutationContext, MutationExecutor, MutationOutcome};
pub use fallback::{generate, FallbackDataset, SeedConfig, DEMO_SCOPE};
pub use gateway::{
    MemoryGateway, OfflineGateway, RemoteGateway, Reply, SnapshotSink, Subscription, UploadedObject,
};
pub use multiplexer::{FeedHandle, FeedKey, SubscriptionMultiplexer};
pub use notices::{Notice, NoticeBoard};
pub use session::{AuthState, SessionMode, SyncSession};
pub use store::{LocalStore, SharedStore, StoreEvent};
