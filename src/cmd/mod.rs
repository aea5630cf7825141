//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `watch`   | `Watch`          |
//! | `publish` | `Publish`        |
//! | `config`  | `Config`         |

pub mod config;
pub mod publish;
pub mod serve;
pub mod watch;

pub use config::cmd_config;
pub use publish::cmd_publish;
pub use serve::cmd_serve;
pub use watch::cmd_watch;
