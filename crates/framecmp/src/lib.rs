//! Frame comparison studio: loads a reference/candidate pair of images or
//! videos, composites them in five visualization modes and diffs them
//! pixel by pixel on a dedicated thread.

pub mod config;
pub mod diff;
pub mod error;
pub mod media;
pub mod render;
pub mod server;
pub mod session;

pub use self::error::{CompareError, ExtractError};
pub use self::session::{Session, SessionOptions, SessionState};
