//! Building blocks for the statka CLI, each one a `clap` struct meant to be flattened into a
//! command's config.

pub mod buffer;
pub mod clickhouse;
pub mod logging;
pub mod socket_addr;
pub mod tokio;
