//! HTTP request handlers.

pub mod forms;
pub mod health;

pub use forms::*;
pub use health::*;
