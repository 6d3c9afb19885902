//! The application's features, one module each.

pub mod health;
pub mod item;
