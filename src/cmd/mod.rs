//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `init`   | `Init`           |
//! | `users`  | `CreateUser`     |
//! | `config` | `Config`         |

pub mod config;
pub mod init;
pub mod serve;
pub mod users;

pub use config::cmd_config;
pub use init::cmd_init;
pub use serve::cmd_serve;
pub use users::cmd_create_user;
