mod bitmap256;
mod consistency;
mod error;

pub use bitmap256::{Bitmap256, DoubleBitmap256};
pub use consistency::{ConsistencyLevel, WriteType};
pub use error::{err, Error, ErrorKind, Result};
