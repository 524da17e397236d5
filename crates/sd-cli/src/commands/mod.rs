//! CLI command implementations

mod config;
mod deploy;
mod history;
mod rollback;
mod status;

pub use config::{config_get, config_path, config_show};
pub use deploy::deploy_command;
pub use history::history_command;
pub use rollback::rollback_command;
pub use status::status_command;
