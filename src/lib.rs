//! Tessera: read-through caching gateway for the community platform.
//!
//! Posts, jobs, quiz landing data, profiles and Mercure tokens are fetched
//! from upstream REST services and cached in Redis (with an in-process
//! fallback) using stale-while-revalidate semantics where it pays off.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod upstream;
