mod convert;
pub mod frame;
pub mod pool;
pub mod source;

pub use frame::{FrameInit, FrameMetadata, PixelFormat, PlaneLayout, SourceFrame, VisibleRect};
pub use pool::{HandleKind, HandleLease, HandlePool};
pub use source::{ChannelSource, FrameSource, SyntheticSource};
