//! A read-only forensics library for mounting XFS filesystem images.
//!
//! This crate never allocates, writes, or repairs anything on the volumes
//! it reads; every operation is a pure decode from bytes supplied by a
//! caller-provided [`ReadAt`] source. It exists to let a caller walk paths,
//! list directories and extended attributes, and read file data out of an
//! XFS image (or a raw device, or a carved partition) without a kernel
//! mount.
//!
//! The entry point is [`Volume::open`]; everything reachable from the
//! returned handle borrows it for as long as it's used.

mod ag;
mod decode;
mod dir;
mod error;
mod extent;
mod file_data;
mod geometry;
mod handle;
mod inobt;
mod inode;
mod io_source;
mod path;
mod xattr;

pub use decode::Cursor;
pub use dir::DirectoryEntry;
pub use error::{Error, ErrorKind, Result};
pub use extent::ExtentRun;
pub use geometry::VolumeGeometry;
pub use handle::{ExtendedAttribute, FileEntry, Volume, VolumeOptions};
pub use inode::{FileKind, ForkFormat, Timestamp};
pub use io_source::{FileSource, ReadAt, SliceSource};
pub use xattr::{AttributeValue, Namespace};
