//! API request handlers

pub mod health;
pub mod mail;

pub use health::*;
