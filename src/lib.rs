//! Client-side data synchronization for a retail storefront and its admin
//! console.
//!
//! - [`cache`]: cached, de-duplicated queries and key-invalidating mutations.
//! - [`session`]: the active credential and transparent token refresh.
//! - [`transport`]: the HTTP seam both of them sit on.
//! - [`api`]: typed products, categories, users and ratings resources.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod infra;
pub mod session;
pub mod transport;

pub use api::Storefront;
pub use cache::{QueryClient, QueryKey};
pub use session::SessionManager;
