// src/lib.rs

//! Star Crawler Library
//!
//! Collects ranked GitHub repositories by walking the creation-date axis in
//! adaptively sized windows, so no single search query exceeds the service's
//! result ceiling.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod source;
pub mod storage;
pub mod utils;
