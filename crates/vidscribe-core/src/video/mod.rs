pub mod decoder;
pub mod frame;

use crate::error::Result;

use frame::Frame;

/// An ordered, finite sequence of decoded frames with a known native rate.
pub trait FrameSource {
    /// Native frame rate in frames per second, as reported by the container.
    fn fps(&self) -> f64;

    /// Read the next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}
