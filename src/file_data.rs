//! File-data reads: logical offset/length against an inode's extent map,
//! with holes and unwritten extents returned as zeros.

use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::extent::{self, ExtentRun};
use crate::geometry::VolumeGeometry;
use crate::inode::{FileKind, ForkFormat, Inode};
use crate::io_source::ReadAt;

/// Maximum size of an inline symlink target.
const MAX_INLINE_SYMLINK: u64 = 1024;

/// Reads up to `length` bytes starting at `offset` from `inode`'s data,
/// returning the bytes actually read (short at EOF).
pub fn read<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, inode: &Inode, offset: u64, length: u64) -> Result<Vec<u8>> {
	if offset >= inode.size_in_bytes {
		return Ok(Vec::new());
	}
	let length = length.min(inode.size_in_bytes - offset);

	if inode.file_kind == FileKind::Symlink && inode.size_in_bytes <= MAX_INLINE_SYMLINK {
		let data = inode.data_fork_bytes();
		let start = offset as usize;
		let end = ((offset + length) as usize).min(data.len());
		return Ok(data.get(start..end).unwrap_or(&[]).to_vec());
	}

	let runs = resolve_runs(source, geometry, inode).context("read_file_data")?;
	let block_size = geometry.block_size as u64;

	let mut out = vec![0u8; length as usize];
	let mut pos = offset;
	let end = offset + length;
	while pos < end {
		let logical_block = pos / block_size;
		let block_offset = pos % block_size;
		let chunk_len = (block_size - block_offset).min(end - pos);
		let out_start = (pos - offset) as usize;

		match extent::find_run(&runs, logical_block) {
			None => {
				// Hole: leave the pre-zeroed region as-is.
			}
			Some(run) if run.unwritten => {
				// Unwritten (speculative) extent reads as zero.
			}
			Some(run) => {
				let physical = run.physical_block + (logical_block - run.logical_block);
				let (ag_index, rel_block) = geometry.split_block(physical);
				let byte_offset = geometry.ag_block_to_byte_offset(ag_index, rel_block).context("read_file_data")? + block_offset;
				let dst = &mut out[out_start..out_start + chunk_len as usize];
				source.read_at(byte_offset, dst).context("read_file_data")?;
			}
		}
		pos += chunk_len;
	}
	Ok(out)
}

/// Resolves the inode's data fork into a flat, logically-sorted extent list.
fn resolve_runs<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, inode: &Inode) -> Result<Vec<ExtentRun>> {
	match inode.data_fork_format {
		ForkFormat::Extents => extent::decode_extent_list(inode.data_fork_bytes()),
		ForkFormat::Btree => {
			let header_level = crate::decode::read_u16(inode.data_fork_bytes(), 2)?;
			let root_ptrs = inode.data_fork_bytes().get(4..).unwrap_or(&[]);
			extent::resolve_btree_fork(source, geometry, root_ptrs, header_level)
		}
		ForkFormat::Inline => Ok(Vec::new()),
		other => Error::err(ErrorKind::UnsupportedValue, format!("file data fork has format {other:?}")),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::inode::Timestamp;

	fn test_geometry() -> VolumeGeometry {
		VolumeGeometry {
			format_version: 5,
			block_size: 512,
			sector_size: 512,
			ag_count: 4,
			ag_block_count: 1000,
			inode_size: 512,
			inodes_per_block: 8,
			root_inode_number: 128,
			relative_block_bits: 10,
			relative_inode_bits: 13,
			feature_bits: 0,
			secondary_feature_bits: 0,
			has_file_type: true,
			has_attr_fork_support: true,
			dir_block_log: 0,
			uuid: uuid::Uuid::nil(),
			label: String::new(),
		}
	}

	fn regular_inode(size: u64, fork_data: Vec<u8>) -> Inode {
		let zero_ts = Timestamp { seconds: 0, nanoseconds: 0 };
		Inode {
			inode_number: 200,
			file_kind: FileKind::Regular,
			permissions: 0o644,
			link_count: 1,
			owner_uid: 0,
			owner_gid: 0,
			size_in_bytes: size,
			number_of_data_blocks: 1,
			access_time: zero_ts,
			modification_time: zero_ts,
			change_time: zero_ts,
			creation_time: None,
			flags: 0,
			data_fork_format: ForkFormat::Extents,
			attributes_fork_format: None,
			number_of_data_extents: 1,
			number_of_attribute_extents: 0,
			attributes_fork_offset: 0,
			generation: 0,
			fork_data,
		}
	}

	fn pack(logical: u64, physical: u64, count: u64) -> [u8; 16] {
		let hi = (logical << 9) | (physical >> 43);
		let lo = (physical << 21) | count;
		let mut out = [0u8; 16];
		out[0..8].copy_from_slice(&hi.to_be_bytes());
		out[8..16].copy_from_slice(&lo.to_be_bytes());
		out
	}

	#[test]
	fn reads_across_a_single_extent() {
		let geometry = test_geometry();
		// physical block 4 lives in AG 0 given ag_block_count=1000.
		let fork = pack(0, 4, 4).to_vec();
		let inode = regular_inode(2048, fork);

		let mut image = vec![0u8; 4096 * 8];
		let payload_offset = 4 * 512;
		image[payload_offset..payload_offset + 11].copy_from_slice(b"hello world");
		let src = crate::io_source::SliceSource::new(image);

		let data = read(&src, &geometry, &inode, 0, 11).unwrap();
		assert_eq!(data, b"hello world");
	}

	#[test]
	fn hole_reads_as_zeros() {
		let geometry = test_geometry();
		// Extent covers logical blocks [2,3) only; block 0 is a hole.
		let fork = pack(2, 4, 1).to_vec();
		let inode = regular_inode(2048, fork);
		let image = vec![0xffu8; 4096 * 8];
		let src = crate::io_source::SliceSource::new(image);

		let data = read(&src, &geometry, &inode, 0, 512).unwrap();
		assert_eq!(data, vec![0u8; 512]);
	}

	#[test]
	fn clamps_read_past_eof() {
		let geometry = test_geometry();
		let fork = pack(0, 4, 1).to_vec();
		let inode = regular_inode(100, fork);
		let image = vec![0u8; 4096 * 8];
		let src = crate::io_source::SliceSource::new(image);

		let data = read(&src, &geometry, &inode, 90, 1000).unwrap();
		assert_eq!(data.len(), 10);
	}

	#[test]
	fn reads_inline_symlink_target() {
		let geometry = test_geometry();
		let mut inode = regular_inode(11, b"/etc/passwd".to_vec());
		inode.file_kind = FileKind::Symlink;
		inode.data_fork_format = ForkFormat::Inline;
		let src = crate::io_source::SliceSource::new(Vec::new());

		let data = read(&src, &geometry, &inode, 0, 11).unwrap();
		assert_eq!(data, b"/etc/passwd");
	}
}
