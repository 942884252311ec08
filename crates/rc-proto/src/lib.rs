pub mod error;
pub mod frame;
pub mod output;
pub mod transfer;

pub use error::{FrameError, TransferError};
pub use frame::{FrameReader, FrameWriter};
