//! Segment persistence

mod disk;

pub use disk::SegmentStore;
