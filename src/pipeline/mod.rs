//! Pipeline entry points for crawler operations.
//!
//! - `run_crawler`: Partition the search domain and persist repositories
//! - `run_validate`: Check a configuration file

pub mod crawl;
pub mod partitioner;
pub mod validate;
pub mod writer;

pub use crawl::{build_source, run_crawler};
pub use partitioner::SearchPartitioner;
pub use validate::run_validate;
pub use writer::WriteQueue;

pub use crate::utils::shutdown::{Shutdown, ShutdownTrigger};
