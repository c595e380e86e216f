//! Infrastructure layer - Store backends, cache services and logging

pub mod cache;
pub mod logging;
