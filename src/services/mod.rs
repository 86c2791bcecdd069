//! GitLab API service implementations.

mod hooks;
mod resources;

pub use hooks::*;
pub use resources::*;
