pub mod config;
pub mod recent;
pub mod run;
