pub mod api;
pub mod build_check;
pub mod config;
pub mod deps;
pub mod errors;
pub mod generate;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod quality;
pub mod repair;
pub mod sandbox;
pub mod server;
pub mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod util;
