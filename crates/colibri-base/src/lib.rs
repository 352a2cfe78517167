pub mod encode;
pub mod frame;
pub mod value;

pub use encode::encode_strings;
pub use frame::{Frame, FrameError};
pub use value::{ArrayValue, ValueKind};
