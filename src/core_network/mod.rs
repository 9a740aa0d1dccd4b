pub mod allocator;
pub mod control;
pub mod data;
pub mod endpoint;
pub mod error;

pub use allocator::{AddrAllocator, PortAllocator, PortRange};
pub use control::{AsyncStream, ControlChannel, ReplyCode};
pub use data::{DataChannel, DataConfig, EpsvMode, PassiveVariant, SscnMode};
pub use endpoint::Endpoint;
pub use error::{FtpError, FxpDirection, Result};
