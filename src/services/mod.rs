//! Service layer for the crawler application.
//!
//! - GitHub GraphQL search transport (`GithubSearchClient`)

mod github;

pub use github::GithubSearchClient;
