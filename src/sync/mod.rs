//! Low-level synchronization primitives shared by the lock-free synchronizers
//!
//! - Monotonic pulse-id watermarks updated through CAS retry loops
//! - A registry of parked consumer threads with an unpark-all broadcast

pub mod wait_ring;
pub mod watermark;

pub use wait_ring::{LockFreeWaitRing, WaitRegistration, WaitStats};
pub use watermark::AtomicWatermark;
