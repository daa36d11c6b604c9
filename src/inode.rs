//! Inode record parsing: fixed header plus the polymorphic fork area.
//!
//! The fixed header is 96 bytes for v1/v2 inodes and 176 bytes for the
//! self-describing v3 (CRC-enabled) layout. What follows the header is one
//! of several fork encodings selected by `di_format`: inline data, a flat
//! extent list, or a B+tree root; this module decodes the header and leaves
//! fork interpretation to [`crate::extent`], [`crate::dir`], and
//! [`crate::xattr`].

use crate::decode::Cursor;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::geometry::VolumeGeometry;
use crate::io_source::ReadAt;

/// Inode magic, `"IN"`.
const INODE_MAGIC: [u8; 2] = *b"IN";

/// Inode flags2 bit marking big-timestamp (64-bit nanosecond) encoding.
const FLAGS2_BIGTIME: u64 = 0x0001;

/// Fork data format, selected by `di_format`/`di_aformat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkFormat {
	/// No fork present (e.g. a device special file's data fork).
	Device,
	/// Fork content is stored inline in the fork's data area.
	Inline,
	/// Fork content is a flat, sorted list of extent descriptors.
	Extents,
	/// Fork content is the root of a B+tree of extent descriptors.
	Btree,
	/// Symlink target and similar single-field forks stored as raw UUID bytes.
	Uuid,
}

impl ForkFormat {
	fn from_raw(value: i8) -> Result<Self> {
		match value {
			0 => Ok(Self::Device),
			1 => Ok(Self::Inline),
			2 => Ok(Self::Extents),
			3 => Ok(Self::Btree),
			4 => Ok(Self::Uuid),
			other => Error::err(ErrorKind::UnsupportedValue, format!("unknown fork format {other}")),
		}
	}
}

/// On-disk inode type, decoded from the mode's upper 4 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
	Fifo,
	CharDevice,
	Directory,
	BlockDevice,
	Regular,
	Symlink,
	Socket,
}

impl FileKind {
	fn from_mode(mode: u16) -> Result<Self> {
		match mode & 0xf000 {
			0x1000 => Ok(Self::Fifo),
			0x2000 => Ok(Self::CharDevice),
			0x4000 => Ok(Self::Directory),
			0x6000 => Ok(Self::BlockDevice),
			0x8000 => Ok(Self::Regular),
			0xa000 => Ok(Self::Symlink),
			0xc000 => Ok(Self::Socket),
			other => Error::err(ErrorKind::UnsupportedValue, format!("unknown inode type bits {other:#06x}")),
		}
	}
}

/// A decoded POSIX timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
	pub seconds: i64,
	pub nanoseconds: u32,
}

impl Timestamp {
	fn from_legacy(raw: &[u8]) -> Self {
		let seconds = i32::from_be_bytes(raw[0..4].try_into().unwrap()) as i64;
		let nanoseconds = u32::from_be_bytes(raw[4..8].try_into().unwrap());
		Self { seconds, nanoseconds }
	}

	fn from_bigtime(raw: &[u8]) -> Self {
		let packed = u64::from_be_bytes(raw[0..8].try_into().unwrap());
		const NSEC_PER_SEC: u64 = 1_000_000_000;
		Self {
			seconds: (packed / NSEC_PER_SEC) as i64,
			nanoseconds: (packed % NSEC_PER_SEC) as u32,
		}
	}
}

/// A parsed inode record: fixed header fields plus the raw fork area.
#[derive(Debug, Clone)]
pub struct Inode {
	pub inode_number: u64,
	pub file_kind: FileKind,
	pub permissions: u16,
	pub link_count: u32,
	pub owner_uid: u32,
	pub owner_gid: u32,
	pub size_in_bytes: u64,
	pub number_of_data_blocks: u64,
	pub access_time: Timestamp,
	pub modification_time: Timestamp,
	pub change_time: Timestamp,
	pub creation_time: Option<Timestamp>,
	pub flags: u16,
	pub data_fork_format: ForkFormat,
	pub attributes_fork_format: Option<ForkFormat>,
	pub number_of_data_extents: u32,
	pub number_of_attribute_extents: u16,
	/// Offset of the attribute fork from the end of the header, in 8-byte units.
	pub attributes_fork_offset: u8,
	pub generation: u32,
	/// Raw bytes of the combined fork area, starting immediately after the header.
	pub fork_data: Vec<u8>,
}

impl Inode {
	/// Parses one inode record out of `data`, which must be at least
	/// `geometry.inode_size` bytes and start at the record's first byte.
	pub fn parse(data: &[u8], geometry: &VolumeGeometry, inode_number: u64) -> Result<Self> {
		if data.len() < geometry.inode_size as usize {
			return Error::err(ErrorKind::InvalidData, "buffer shorter than inode record size");
		}
		let mut c = Cursor::new(data);
		let magic = c.take_slice(2).context("inode")?;
		if magic != INODE_MAGIC {
			return Error::err(
				ErrorKind::SignatureMismatch,
				format!("expected inode magic \"IN\", found {magic:?}"),
			);
		}
		let mode = c.u16().context("inode")?;
		let version = c.u8().context("inode")? as i8;
		let data_format_raw = c.u8().context("inode")? as i8;
		let _onlink_v1 = c.u16().context("inode")?;
		let owner_uid = c.u32().context("inode")?;
		let owner_gid = c.u32().context("inode")?;
		let link_count = c.u32().context("inode")?;
		let _projid = c.u16().context("inode")?;
		let _projid_hi = c.u16().context("inode")?;
		let _pad = c.bytes(6).context("inode")?;
		let _flushiter = c.u16().context("inode")?;

		if version < 1 || version > 3 {
			return Error::err(ErrorKind::UnsupportedVersion, format!("inode version {version} is not supported"));
		}
		let is_v3 = version == 3;

		// Timestamp kind is decided by flags2 (v3 only), but flags2 lives
		// after the timestamps in the v3 layout, so peek it ahead of time.
		let uses_bigtime = if is_v3 {
			let flags2 = crate::decode::read_u64(data, 120)?;
			flags2 & FLAGS2_BIGTIME != 0
		} else {
			false
		};
		let decode_ts = |raw: &[u8]| if uses_bigtime { Timestamp::from_bigtime(raw) } else { Timestamp::from_legacy(raw) };

		let atime_raw = c.take_slice(8).context("inode")?;
		let mtime_raw = c.take_slice(8).context("inode")?;
		let ctime_raw = c.take_slice(8).context("inode")?;
		let access_time = decode_ts(atime_raw);
		let modification_time = decode_ts(mtime_raw);
		let change_time = decode_ts(ctime_raw);

		let size_in_bytes = c.u64().context("inode")?;
		let number_of_data_blocks = c.u64().context("inode")?;
		let _extsize = c.u32().context("inode")?;
		let number_of_data_extents = c.u32().context("inode")?;
		let number_of_attribute_extents = c.u16().context("inode")?;
		let attributes_fork_offset = c.u8().context("inode")?;
		let attributes_format_raw = c.u8().context("inode")? as i8;
		let _dmevmask = c.u32().context("inode")?;
		let _dmstate = c.u16().context("inode")?;
		let flags = c.u16().context("inode")?;
		let generation = c.u32().context("inode")?;

		let data_fork_format = ForkFormat::from_raw(data_format_raw).context("inode")?;
		let attributes_fork_format = if attributes_fork_offset != 0 {
			Some(ForkFormat::from_raw(attributes_format_raw).context("inode")?)
		} else {
			None
		};

		let header_size = geometry.inode_header_size();
		let creation_time = if is_v3 {
			c.seek(144);
			let crtime_raw = c.take_slice(8).context("inode")?;
			c.seek(152);
			let stored_ino = c.u64().context("inode")?;
			if stored_ino != inode_number {
				return Error::err(
					ErrorKind::InvalidData,
					format!("v5 inode self-check failed: record claims inode {stored_ino}, expected {inode_number}"),
				);
			}
			Some(decode_ts(crtime_raw))
		} else {
			None
		};

		let fork_data = data
			.get(header_size..geometry.inode_size as usize)
			.ok_or_else(|| Error::new(ErrorKind::InvalidData, "inode record shorter than its own header"))?
			.to_vec();

		Ok(Self {
			inode_number,
			file_kind: FileKind::from_mode(mode).context("inode")?,
			permissions: mode & 0x0fff,
			link_count,
			owner_uid,
			owner_gid,
			size_in_bytes,
			number_of_data_blocks,
			access_time,
			modification_time,
			change_time,
			creation_time,
			flags,
			data_fork_format,
			attributes_fork_format,
			number_of_data_extents,
			number_of_attribute_extents,
			attributes_fork_offset,
			generation,
			fork_data,
		})
	}

	/// Reads and parses the inode identified by `inode_number` from `source`.
	pub fn read<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, inode_number: u64) -> Result<Self> {
		let offset = crate::inobt::locate(source, geometry, inode_number).context("read_inode")?;
		let mut buf = vec![0u8; geometry.inode_size as usize];
		source.read_at(offset, &mut buf).context("read_inode")?;
		Self::parse(&buf, geometry, inode_number).context("read_inode")
	}

	/// Returns the data fork's raw bytes (everything before the attribute
	/// fork begins, or the whole fork area if there is no attribute fork).
	pub fn data_fork_bytes(&self) -> &[u8] {
		if self.attributes_fork_offset == 0 {
			&self.fork_data
		} else {
			let boundary = (self.attributes_fork_offset as usize) * 8;
			self.fork_data.get(..boundary).unwrap_or(&self.fork_data)
		}
	}

	/// Returns the attribute fork's raw bytes, if the inode has one.
	pub fn attributes_fork_bytes(&self) -> Option<&[u8]> {
		if self.attributes_fork_offset == 0 {
			return None;
		}
		let boundary = (self.attributes_fork_offset as usize) * 8;
		self.fork_data.get(boundary..)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn build_v3_inode(inode_size: usize, inode_number: u64, mode: u16) -> Vec<u8> {
		let mut data = vec![0u8; inode_size];
		data[0..2].copy_from_slice(b"IN");
		data[2..4].copy_from_slice(&mode.to_be_bytes());
		data[4] = 3; // version
		data[5] = 2; // data format: extents
		data[16..20].copy_from_slice(&1u32.to_be_bytes()); // nlink
		// atime/mtime/ctime left zeroed (legacy, since flags2 bigtime bit unset)
		data[56..64].copy_from_slice(&4096u64.to_be_bytes()); // size
		data[76..80].copy_from_slice(&1u32.to_be_bytes()); // nextents
		data[90..92].copy_from_slice(&0u16.to_be_bytes()); // flags
		data[92..96].copy_from_slice(&7u32.to_be_bytes()); // gen
		data[152..160].copy_from_slice(&inode_number.to_be_bytes());
		data
	}

	#[test]
	fn parses_v3_inode_header() {
		let data = build_v3_inode(176, 128, 0x81a4); // regular file, 0644
		let inode = Inode::parse(&data, &test_geometry(176), 128).unwrap();
		assert_eq!(inode.file_kind, FileKind::Regular);
		assert_eq!(inode.permissions, 0o644);
		assert_eq!(inode.size_in_bytes, 4096);
		assert_eq!(inode.generation, 7);
		assert_eq!(inode.data_fork_format, ForkFormat::Extents);
	}

	#[test]
	fn rejects_self_check_mismatch() {
		let data = build_v3_inode(176, 128, 0x81a4);
		let err = Inode::parse(&data, &test_geometry(176), 999).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidData);
	}

	#[test]
	fn rejects_bad_magic() {
		let mut data = build_v3_inode(176, 128, 0x81a4);
		data[0] = b'X';
		let err = Inode::parse(&data, &test_geometry(176), 128).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
	}

	#[test]
	fn decodes_directory_kind() {
		let data = build_v3_inode(176, 2, 0x41ed); // dir, 0755
		let inode = Inode::parse(&data, &test_geometry(176), 2).unwrap();
		assert_eq!(inode.file_kind, FileKind::Directory);
	}

	#[test]
	fn bigtime_timestamp_round_trips() {
		let mut data = build_v3_inode(176, 128, 0x81a4);
		data[120..128].copy_from_slice(&FLAGS2_BIGTIME.to_be_bytes());
		let nanos: u64 = 1_700_000_000 * 1_000_000_000 + 123;
		data[32..40].copy_from_slice(&nanos.to_be_bytes());
		let inode = Inode::parse(&data, &test_geometry(176), 128).unwrap();
		assert_eq!(inode.access_time.seconds, 1_700_000_000);
		assert_eq!(inode.access_time.nanoseconds, 123);
	}

	fn test_geometry(inode_size: u16) -> VolumeGeometry {
		VolumeGeometry {
			format_version: 5,
			block_size: 4096,
			sector_size: 512,
			ag_count: 1,
			ag_block_count: 1000,
			inode_size,
			inodes_per_block: 4096 / inode_size,
			root_inode_number: 128,
			relative_block_bits: 10,
			relative_inode_bits: 12,
			feature_bits: 0,
			secondary_feature_bits: 0,
			has_file_type: true,
			has_attr_fork_support: true,
			dir_block_log: 0,
			uuid: uuid::Uuid::nil(),
			label: String::new(),
		}
	}
}
