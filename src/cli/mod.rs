//! # CLI Module
//!
//! Tooling around a service's handler tree.
//!
//! ```bash
//! # Print the derived route table
//! waypost routes --config service.yaml
//!
//! # Parse every descriptor and compile its schema; exits non-zero on failure
//! waypost check --config service.yaml
//! ```

mod commands;


pub use commands::{check_tree, route_lines, run_cli, Cli, Commands};
