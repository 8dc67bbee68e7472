//! # sync-client
//!
//! Client side of the splitsync operation log.
//!
//! Applications open one [`SyncEngine`] per replica and put the domain
//! repositories on top of it. Repositories validate and author operations,
//! the engine records them, ships them to the server and feeds back what
//! other replicas wrote.
//!
//! ## Features
//!
//! - **Optimistic writes**: a mutation is visible locally as soon as it is recorded
//! - **Push / confirm / pull**: the three-call protocol behind [`Transport`]
//! - **Durable log**: pending operations survive restarts through [`OperationStore`]
//! - **Fine-grained change events**: one event per changed aggregate
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  ┌────────────────────┐  ┌──────────────────┐
//! │UsersRepository │  │SpendingsRepository │  │ ImagesRepository │
//! └───────┬────────┘  └─────────┬──────────┘  └────────┬─────────┘
//!         │ push()        updates │ (Learned / Rejected)│
//!         └──────────────┬────────┴─────────────────────┘
//!                 ┌──────▼──────┐
//!                 │ SyncEngine  │── OperationStore (durable log)
//!                 └──────┬──────┘
//!                        │ Transport
//!                 ┌──────▼──────┐
//!                 │   server    │
//!                 └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use splitsync_client::{FileStore, SpendingsRepository, SyncConfig, SyncEngine, SystemClock};
//!
//! let engine = SyncEngine::open(
//!     me,
//!     transport,
//!     FileStore::new("splitsync.log"),
//!     Arc::new(SystemClock),
//!     SyncConfig::default(),
//! )
//! .await?;
//!
//! let spendings = SpendingsRepository::open(&engine).await;
//! let group = spendings.create_spending_group("Trip", &[friend]).await?;
//! spendings
//!     .create_spending(&group.id, "Dinner", vec![Share::new(me, 40), Share::new(friend, -40)])
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod repository;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, RetryConfig, SyncConfig};
pub use engine::{Subscription, SyncEngine, SyncError, Update};
pub use repository::{
    ImagesError, ImagesRepository, SpendingsError, SpendingsRepository, UsersError,
    UsersRepository,
};
pub use store::{FileStore, MemoryStore, OperationStore, StoreError};
pub use transport::{MemoryRelay, MockTransport, RelayTransport, Transport, TransportError};
