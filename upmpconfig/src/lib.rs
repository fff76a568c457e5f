//! # upmpconfig
//!
//! INI-like hierarchical configuration store for upmpd-rs, plus the CLI
//! flags and environment overrides that feed it. Every other crate in the
//! workspace depends on this one for its parameters (spec.md §2).
//!
//! - [`ConfSimple`] is the flat, comment-preserving document model.
//! - [`ConfTree`] adds `/`-path hierarchical section inheritance on top.
//! - [`ConfStack`] stacks several trees so writes go to the top layer and
//!   collapse when they'd just repeat a lower layer's value.
//! - [`AppConfig`] is the typed facade the rest of the workspace actually
//!   calls, combining CLI flags, `UPMPD_`-prefixed environment variables and
//!   the on-disk configuration file.

mod appconfig;
mod cli;
pub mod error;
mod flags;
mod line;
mod simple;
mod stack;
mod tree;

pub use appconfig::AppConfig;
pub use cli::{log_level_to_filter, Cli};
pub use error::{Error, Result};
pub use flags::Flags;
pub use simple::ConfSimple;
pub use stack::ConfStack;
pub use tree::ConfTree;
