//! CLI command implementations.
//!
//! | Module      | Commands handled              |
//! |-------------|-------------------------------|
//! | `serve`     | `Serve`                       |
//! | `templates` | `Templates`                   |
//! | `config`    | `Config`                      |
//! | `client`    | `Watch`, `Move`, `Post`       |

pub mod client;
pub mod config;
pub mod serve;
pub mod templates;

pub use client::{cmd_move, cmd_post, cmd_watch};
pub use config::cmd_config;
pub use serve::cmd_serve;
pub use templates::cmd_templates;
