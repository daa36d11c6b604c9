//! Directory enumeration across all five on-disk directory layouts.
//!
//! Short-form directories live inline in the inode; every other layout is
//! one or more filesystem blocks reached through the data fork's extent
//! map. Multi-block directories additionally carry leaf/node index blocks
//! above a fixed logical-block threshold; this walker only ever reads the
//! data region below that threshold; the index blocks exist purely to
//! accelerate by-name lookup, which this crate implements as a linear scan
//! instead.

use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::extent::{self, ExtentRun};
use crate::geometry::VolumeGeometry;
use crate::inode::{ForkFormat, Inode};
use crate::io_source::ReadAt;

/// One directory entry as it appears on disk (namespace-free, byte-wise name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
	pub inode_number: u64,
	pub name: Vec<u8>,
}

/// Logical fs-block offset where leaf index blocks begin: `2^35 / block_size`.
fn leaf_offset_fsblocks(block_size: u32) -> u64 {
	(1u64 << 35) / block_size as u64
}

/// Lists every non-`.`/`..` entry of a directory inode.
pub fn list<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, inode: &Inode) -> Result<Vec<DirectoryEntry>> {
	match inode.data_fork_format {
		ForkFormat::Inline => parse_shortform(inode.data_fork_bytes(), geometry).context("list_directory"),
		ForkFormat::Extents => {
			let runs = extent::decode_extent_list(inode.data_fork_bytes()).context("list_directory")?;
			list_from_runs(source, geometry, &runs).context("list_directory")
		}
		ForkFormat::Btree => {
			let header_level = crate::decode::read_u16(inode.data_fork_bytes(), 2).context("list_directory")?;
			let root_ptrs = inode.data_fork_bytes().get(4..).unwrap_or(&[]);
			let runs = extent::resolve_btree_fork(source, geometry, root_ptrs, header_level).context("list_directory")?;
			list_from_runs(source, geometry, &runs).context("list_directory")
		}
		other => Error::err(ErrorKind::UnsupportedValue, format!("directory inode has fork format {other:?}")),
	}
}

/// Reads and decodes every directory data block referenced by `runs`.
fn list_from_runs<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, runs: &[ExtentRun]) -> Result<Vec<DirectoryEntry>> {
	let dir_block_fsblocks = geometry.dir_block_fs_blocks() as u64;
	let dir_block_size = geometry.dir_block_size() as usize;
	let leaf_offset = leaf_offset_fsblocks(geometry.block_size);

	let mut entries = Vec::new();
	let mut dirblk = 0u64;
	loop {
		let logical_start = dirblk * dir_block_fsblocks;
		if logical_start >= leaf_offset {
			break;
		}
		if extent::find_run(runs, logical_start).is_none() {
			// No more allocated data blocks; the directory has no index
			// blocks present either (small directories never grow into
			// them), so this marks the natural end of iteration.
			break;
		}
		let block = read_directory_block(source, geometry, runs, logical_start, dir_block_fsblocks, dir_block_size)?;
		entries.extend(parse_data_block(&block, geometry)?);
		dirblk += 1;
	}
	Ok(entries)
}

/// Reads one logical directory block, which may span several contiguous
/// filesystem blocks, resolving each through the extent map independently.
fn read_directory_block<R: ReadAt + ?Sized>(
	source: &R,
	geometry: &VolumeGeometry,
	runs: &[ExtentRun],
	logical_start: u64,
	fsblocks: u64,
	dir_block_size: usize,
) -> Result<Vec<u8>> {
	let mut buf = Vec::with_capacity(dir_block_size);
	for i in 0..fsblocks {
		let logical = logical_start + i;
		let run = extent::find_run(runs, logical)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "directory data block is unexpectedly sparse"))?;
		if run.unwritten {
			return Error::err(ErrorKind::InvalidData, "directory data block is unwritten");
		}
		let physical = run.physical_block + (logical - run.logical_block);
		let (ag_index, rel_block) = geometry.split_block(physical);
		let offset = geometry.ag_block_to_byte_offset(ag_index, rel_block)?;
		let mut fsblock = vec![0u8; geometry.block_size as usize];
		source.read_at(offset, &mut fsblock)?;
		buf.extend_from_slice(&fsblock);
	}
	Ok(buf)
}

/// Parses a short-form directory stored inline in the data fork.
fn parse_shortform(data: &[u8], geometry: &VolumeGeometry) -> Result<Vec<DirectoryEntry>> {
	if data.len() < 6 {
		return Error::err(ErrorKind::InvalidData, "short-form directory header truncated");
	}
	let count = data[0];
	let count8 = data[1];
	let total = if count8 != 0 { count8 as usize } else { count as usize };
	let wide_parent = count8 != 0;
	let parent_size = if wide_parent { 8 } else { 4 };
	let mut pos = 2 + parent_size;

	let mut entries = Vec::with_capacity(total);
	for _ in 0..total {
		let name_length = *data
			.get(pos)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "short-form entry header past end of fork"))?;
		if name_length == 0 || name_length > 255 {
			return Error::err(ErrorKind::InvalidData, format!("invalid short-form name length {name_length}"));
		}
		pos += 1;
		// tag_offset: an unused back-reference to this entry's own offset,
		// not needed for forward iteration, but still present on disk.
		pos += 2;
		let name = data
			.get(pos..pos + name_length as usize)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "short-form entry name past end of fork"))?
			.to_vec();
		pos += name_length as usize;
		if geometry.has_file_type {
			pos += 1; // file-type byte, not needed for iteration
		}
		let inode_field_size = if wide_parent { 8 } else { 4 };
		let raw_ino = data
			.get(pos..pos + inode_field_size)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "short-form entry inumber past end of fork"))?;
		let inode_number = if wide_parent {
			u64::from_be_bytes(raw_ino.try_into().unwrap())
		} else {
			u32::from_be_bytes(raw_ino.try_into().unwrap()) as u64
		};
		pos += inode_field_size;

		entries.push(DirectoryEntry { inode_number, name });
	}
	Ok(entries)
}

/// Parses one data block's entry region (block/leaf/node layout), skipping
/// any trailing leaf hash-table footer a single-block directory carries.
fn parse_data_block(data: &[u8], geometry: &VolumeGeometry) -> Result<Vec<DirectoryEntry>> {
	if data.len() < 16 {
		return Error::err(ErrorKind::InvalidData, "directory data block shorter than its header");
	}
	let magic = &data[0..4];
	let (header_size, has_footer) = match magic {
		b"XD2B" => (16, true),
		b"XDB3" => (64, true),
		b"XD2D" => (16, false),
		b"XDD3" => (64, false),
		other => {
			return Error::err(
				ErrorKind::SignatureMismatch,
				format!("unexpected directory data block signature {other:?}"),
			)
		}
	};

	let entries_end = if has_footer {
		if data.len() < 8 {
			return Error::err(ErrorKind::InvalidData, "block-directory footer truncated");
		}
		let leaf_count = crate::decode::read_u32(data, data.len() - 8)?;
		let footer_leaves_bytes = leaf_count as usize * 8;
		data.len()
			.checked_sub(8 + footer_leaves_bytes)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "block-directory leaf table overruns block"))?
	} else {
		data.len()
	};

	let mut entries = Vec::new();
	let mut pos = header_size;
	while pos < entries_end {
		let remaining = entries_end - pos;
		if remaining < 2 {
			break;
		}
		let marker = crate::decode::read_u16(data, pos)?;
		if marker == 0xffff {
			if remaining < 4 {
				return Error::err(ErrorKind::InvalidData, "free-region length field truncated");
			}
			let length = crate::decode::read_u16(data, pos + 2)? as usize;
			if length == 0 || pos + length > entries_end {
				return Error::err(ErrorKind::InvalidData, "free region length out of bounds");
			}
			pos += length;
			continue;
		}

		if remaining < 9 {
			return Error::err(ErrorKind::InvalidData, "directory entry header truncated");
		}
		let inode_number = crate::decode::read_u64(data, pos)?;
		let name_length = data[pos + 8];
		if name_length == 0 || name_length > 255 {
			return Error::err(ErrorKind::InvalidData, format!("invalid directory entry name length {name_length}"));
		}
		let name_start = pos + 9;
		let name_end = name_start + name_length as usize;
		let after_name_end = if geometry.has_file_type { name_end + 1 } else { name_end };
		let entry_tagged_end = after_name_end + 2; // trailing tag_offset u16
		if entry_tagged_end > entries_end {
			return Error::err(ErrorKind::InvalidData, "directory entry exceeds block bounds");
		}
		let name = data[name_start..name_end].to_vec();

		let raw_size = entry_tagged_end - pos;
		let padded_size = raw_size.div_ceil(8) * 8;
		if pos + padded_size > entries_end {
			return Error::err(ErrorKind::InvalidData, "padded directory entry exceeds block bounds");
		}

		if name != b"." && name != b".." {
			entries.push(DirectoryEntry { inode_number, name });
		}
		pos += padded_size;
	}
	Ok(entries)
}
