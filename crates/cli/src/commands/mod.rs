//! CLI Commands

pub mod db;
pub mod lock;
pub mod scenario;
