//! Allocation-group header parsing.
//!
//! Each allocation group (AG) starts with four fixed sectors: the
//! superblock replica (unused by this parser beyond AG 0), the free-space
//! header (AGF), the inode header (AGI), and the free-list (AGFL). This
//! module parses only as much of the AGI as is needed to locate the root
//! of that AG's inode B+tree (§4.3); the AGF/AGFL are out of scope since
//! this library never allocates.

use crate::decode::Cursor;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::geometry::VolumeGeometry;
use crate::io_source::ReadAt;

/// AGI header magic, `"XAGI"`.
const XAGI_MAGIC: [u8; 4] = *b"XAGI";

/// The subset of the AG inode header (AGI) needed to find the inode B+tree root.
#[derive(Debug, Clone, Copy)]
pub struct AgiHeader {
	/// Sequence number of this AG (should equal its index).
	pub sequence_number: u32,
	/// Number of inodes allocated in this AG.
	pub inode_count: u32,
	/// AG-relative block number of the inode B+tree root.
	pub inobt_root: u32,
	/// Height of the inode B+tree.
	pub inobt_level: u32,
}

impl AgiHeader {
	/// Parses an AGI header from a buffer starting at its first byte.
	pub fn parse(data: &[u8]) -> Result<Self> {
		let mut c = Cursor::new(data);
		c.expect_signature(&XAGI_MAGIC).context("agi_header")?;
		let _version = c.u32().context("agi_header")?;
		let sequence_number = c.u32().context("agi_header")?;
		let _length = c.u32().context("agi_header")?;
		let inode_count = c.u32().context("agi_header")?;
		let inobt_root = c.u32().context("agi_header")?;
		let inobt_level = c.u32().context("agi_header")?;
		if inobt_level > 16 {
			return Error::err(
				ErrorKind::InvalidData,
				format!("inode B+tree level {inobt_level} exceeds sane bound"),
			);
		}
		Ok(Self {
			sequence_number,
			inode_count,
			inobt_root,
			inobt_level,
		})
	}

	/// Reads and parses the AGI header for allocation group `ag_index`.
	///
	/// The AGI occupies the third sector of the AG (sector index 2, after
	/// the superblock replica and the AGF).
	pub fn read<R: ReadAt + ?Sized>(source: &R, geometry: &VolumeGeometry, ag_index: u32) -> Result<Self> {
		if ag_index >= geometry.ag_count {
			return Error::err(
				ErrorKind::InvalidData,
				format!("AG index {ag_index} out of bounds ({} AGs)", geometry.ag_count),
			);
		}
		let offset = geometry.ag_start_byte_offset(ag_index) + 2 * geometry.sector_size as u64;
		let mut buf = vec![0u8; geometry.block_size as usize];
		source.read_at(offset, &mut buf).context("agi_header")?;
		let agi = Self::parse(&buf).context("agi_header")?;
		if agi.sequence_number != ag_index {
			return Error::err(
				ErrorKind::InvalidData,
				format!("AGI sequence number {} does not match AG index {ag_index}", agi.sequence_number),
			);
		}
		Ok(agi)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::io_source::SliceSource;

	fn build_agi(seq: u32, inode_count: u32, inobt_root: u32, inobt_level: u32) -> Vec<u8> {
		let mut data = vec![0u8; 128];
		data[0..4].copy_from_slice(b"XAGI");
		data[8..12].copy_from_slice(&seq.to_be_bytes());
		data[16..20].copy_from_slice(&inode_count.to_be_bytes());
		data[20..24].copy_from_slice(&inobt_root.to_be_bytes());
		data[24..28].copy_from_slice(&inobt_level.to_be_bytes());
		data
	}

	#[test]
	fn parses_agi_header() {
		let data = build_agi(0, 64, 3, 1);
		let agi = AgiHeader::parse(&data).unwrap();
		assert_eq!(agi.inobt_root, 3);
		assert_eq!(agi.inobt_level, 1);
	}

	#[test]
	fn rejects_bad_signature() {
		let mut data = build_agi(0, 64, 3, 1);
		data[0] = b'Z';
		assert_eq!(AgiHeader::parse(&data).unwrap_err().kind(), ErrorKind::SignatureMismatch);
	}

	#[test]
	fn read_validates_sequence_number() {
		let block_size = 512u32;
		let sector_size = 512u16;
		let ag_block_count = 100u32;
		let mut image = vec![0u8; (ag_block_count as usize) * block_size as usize];
		let agi = build_agi(1 /* wrong: should be 0 */, 1, 1, 0);
		image[2 * sector_size as usize..2 * sector_size as usize + agi.len()].copy_from_slice(&agi);
		let src = SliceSource::new(image);

		let mut sb = vec![0u8; 512];
		sb[0..4].copy_from_slice(b"XFSB");
		sb[4..8].copy_from_slice(&block_size.to_be_bytes());
		sb[84..88].copy_from_slice(&ag_block_count.to_be_bytes());
		sb[88..92].copy_from_slice(&1u32.to_be_bytes());
		sb[100..102].copy_from_slice(&5u16.to_be_bytes());
		sb[102..104].copy_from_slice(&sector_size.to_be_bytes());
		sb[104..106].copy_from_slice(&512u16.to_be_bytes());
		sb[106..108].copy_from_slice(&4u16.to_be_bytes());
		let geometry = VolumeGeometry::parse(&sb).unwrap();

		let err = AgiHeader::read(&src, &geometry, 0).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::InvalidData);
	}
}
