//! fastdeploy library
//!
//! Core modules of the fastdeploy deployment orchestrator.

pub mod app;
pub mod authn;
pub mod bus;
pub mod deploy;
pub mod domain;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod server;
pub mod services;
pub mod sources;
pub mod storage;
pub mod utils;
