//! Outer shell of MergeGuard: configuration file handling and
//! command-backed implementations of the pipeline's external collaborators.

pub mod command;
pub mod config;
pub mod executor;
pub mod post_merge;
pub mod reviewer_bridge;

pub use command::CommandLine;
pub use config::MergeguardConfig;
pub use executor::CommandWorker;
pub use post_merge::CommandCheck;
pub use reviewer_bridge::CommandReviewer;
