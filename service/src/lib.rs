//! Process-level infrastructure shared by the server binary and the web layer:
//! command line / environment configuration and logger initialization.

pub mod config;
pub mod logging;
