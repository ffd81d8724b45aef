//! QueryLite SDK - Typed Rust API for the QueryLite cache
//!
//! The core `querylite` crate stores and returns `serde_json::Value`. This
//! crate layers serde types on top: queries deserialize into your structs,
//! mutations take typed variables, and observers expose a typed view of a
//! subscribed entry.
//!
//! # Quick Start
//!
//! ```no_run
//! use querylite::{key, FetchError, QueryClient};
//! use querylite_sdk::{Error, TypedQuery};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # async fn run() -> Result<(), Error> {
//! let client = QueryClient::new();
//! let users = TypedQuery::<Vec<User>>::new(&client, key!["users"], |_ctx| async {
//!     Ok::<_, FetchError>(vec![User { id: 1, name: "Ada".into() }])
//! });
//!
//! // Fetches once, then serves from the cache while fresh
//! for user in users.query().await? {
//!     println!("{}: {}", user.id, user.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Application Code (Your Rust App)      │
//! └─────────────────────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  QueryLite SDK (this crate)             │
//! │  - TypedQuery (typed reads)             │
//! │  - TypedMutation (typed writes)         │
//! │  - QueryObserver (subscribed view)      │
//! └─────────────────────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  QueryLite Core (querylite crate)       │
//! │  - QueryClient                          │
//! │  - Hook bus and plugins                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`query`] - Typed queries
//! - [`mutation`] - Typed mutations
//! - [`observer`] - Subscribed, typed entry views
//! - [`error`] - Error types and handling

// Re-export core types for convenience
pub use querylite::{key, ClientConfig, Key, QueryClient, QueryOptions, QueryStatus};

// SDK modules
pub mod error;
pub mod mutation;
pub mod observer;
pub mod query;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use mutation::TypedMutation;
pub use observer::{ObservedState, QueryObserver};
pub use query::TypedQuery;
