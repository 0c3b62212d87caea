//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `config`   | `Config`         |
//! | `catalog`  | `Catalog`        |

pub mod catalog;
pub mod config;
pub mod serve;

pub use catalog::cmd_catalog;
pub use config::cmd_config;
pub use serve::{ServeOverrides, cmd_serve};
