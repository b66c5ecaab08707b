//! FUSE filesystem implementation
//!
//! Mirrors a backing directory, storing files created through the mount
//! as ciphertext and passing everything else through unchanged.

mod filesystem;
mod inode;
mod mirror;
mod pipeline;
mod staging;

pub use filesystem::XcryptFs;
pub use mirror::{DirEntry, MirrorLayer};
