pub mod config_cmd;
pub mod run;
pub mod serve;
pub mod services;
pub mod sources;
