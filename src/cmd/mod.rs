//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `serve`         | `Serve`                                            |
//! | `generate`      | `Generate`                                         |
//! | `sandbox`       | `Sandbox`                                          |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod generate;
pub mod sandbox;
pub mod serve;

pub use config::cmd_config;
pub use generate::{GenerateArgs, cmd_generate};
pub use sandbox::cmd_sandbox;
pub use serve::cmd_serve;
