//! Core interfaces shared by every layer

mod traits;

pub use traits::Configurable;
