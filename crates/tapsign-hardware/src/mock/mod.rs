//! Mock tag and detector implementations for testing and development.
//!
//! Both mocks come with a handle that drives them from test code, in the
//! same way a user tapping and removing a physical token would.

pub mod detector;
pub mod tag;

// Re-export commonly used types
pub use detector::{DetectionChange, MockDetector, MockDetectorHandle};
pub use tag::{MockReply, MockTag, MockTagHandle};
