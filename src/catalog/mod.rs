//! The catalog client (C2) and its on-disk mirror, the catalog cache (C3).

pub mod cache;
pub mod client;

pub use cache::CatalogCache;
pub use client::CatalogClient;
