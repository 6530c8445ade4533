//! Persistence and configuration

pub mod layout;
pub mod repositories;
pub mod settings;
pub mod table;
pub mod uow;
