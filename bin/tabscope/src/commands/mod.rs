pub mod config_cmd;
pub mod tail;
pub mod targets;
pub mod watch;
