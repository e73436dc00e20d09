//! Wire types spoken by the audio node, and the built [`Track`] value object.

mod incoming;
mod info;
mod track;

pub use incoming::*;
pub use info::*;
pub use track::*;
