//! Bag-of-cells reader.
//!
//! TON message bodies travel as serialized bags of cells (BoC). Event payloads only ever
//! live in the root cell, so this module parses the container, keeps every cell's data bits
//! and exposes a bit-level `CellSlice` over a cell for field decoding.

use super::address::AccountAddress;
use thiserror::Error;

const BOC_GENERIC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];
const MAX_CELL_REFS: usize = 4;
const MAX_CELL_BITS: usize = 1023;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CellError {
	#[error("unsupported bag-of-cells magic {0:02x?}")]
	BadMagic([u8; 4]),
	#[error("bag of cells truncated at byte {0}")]
	Truncated(usize),
	#[error("malformed bag of cells: {0}")]
	Malformed(String),
	#[error("cell underflow: wanted {wanted} bits, {remaining} remaining")]
	Underflow { wanted: usize, remaining: usize },
	#[error("unsupported address form (tag {0:#04b})")]
	UnsupportedAddress(u8),
}

/// A single cell: up to 1023 data bits and up to four references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
	data: Vec<u8>,
	bit_len: usize,
	refs: Vec<usize>,
}

impl Cell {
	pub fn bit_len(&self) -> usize {
		self.bit_len
	}

	/// Indices of referenced cells within the owning bag.
	pub fn refs(&self) -> &[usize] {
		&self.refs
	}

	pub fn slice(&self) -> CellSlice<'_> {
		CellSlice {
			data: &self.data,
			bit_len: self.bit_len,
			pos: 0,
		}
	}
}

/// A parsed bag of cells.
#[derive(Debug, Clone)]
pub struct BagOfCells {
	cells: Vec<Cell>,
	roots: Vec<usize>,
}

struct ByteReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> ByteReader<'a> {
	fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
		let end = self
			.pos
			.checked_add(n)
			.filter(|end| *end <= self.bytes.len())
			.ok_or(CellError::Truncated(self.bytes.len()))?;
		let out = &self.bytes[self.pos..end];
		self.pos = end;
		Ok(out)
	}

	fn byte(&mut self) -> Result<u8, CellError> {
		Ok(self.take(1)?[0])
	}

	fn uint(&mut self, width: usize) -> Result<usize, CellError> {
		let mut value = 0usize;
		for byte in self.take(width)? {
			value = (value << 8) | *byte as usize;
		}
		Ok(value)
	}
}

impl BagOfCells {
	/// Parse a serialized bag of cells in the generic (`b5ee9c72`) format.
	///
	/// The optional CRC32-C trailer is not verified; bodies come from an indexer that already
	/// validated the block they belong to.
	pub fn parse(bytes: &[u8]) -> Result<Self, CellError> {
		let mut reader = ByteReader { bytes, pos: 0 };

		let magic = reader.take(4)?;
		if magic != BOC_GENERIC_MAGIC {
			let mut found = [0u8; 4];
			found.copy_from_slice(magic);
			return Err(CellError::BadMagic(found));
		}

		let flags = reader.byte()?;
		let has_idx = flags & 0x80 != 0;
		let ref_size = (flags & 0x07) as usize;
		if ref_size == 0 || ref_size > 4 {
			return Err(CellError::Malformed(format!(
				"invalid reference size {}",
				ref_size
			)));
		}
		let off_bytes = reader.byte()? as usize;
		if off_bytes == 0 || off_bytes > 8 {
			return Err(CellError::Malformed(format!(
				"invalid offset size {}",
				off_bytes
			)));
		}

		let cell_count = reader.uint(ref_size)?;
		let root_count = reader.uint(ref_size)?;
		let _absent = reader.uint(ref_size)?;
		let total_cells_size = reader.uint(off_bytes)?;

		if root_count == 0 {
			return Err(CellError::Malformed("no root cells".to_string()));
		}
		if cell_count > bytes.len() {
			return Err(CellError::Malformed(format!(
				"{} cells cannot fit in {} bytes",
				cell_count,
				bytes.len()
			)));
		}

		let mut roots = Vec::with_capacity(root_count);
		for _ in 0..root_count {
			let root = reader.uint(ref_size)?;
			if root >= cell_count {
				return Err(CellError::Malformed(format!(
					"root index {} out of range",
					root
				)));
			}
			roots.push(root);
		}

		if has_idx {
			reader.take(cell_count * off_bytes)?;
		}

		let cells_start = reader.pos;
		let mut cells = Vec::with_capacity(cell_count);
		for index in 0..cell_count {
			cells.push(Self::parse_cell(&mut reader, index, cell_count, ref_size)?);
		}
		if reader.pos - cells_start != total_cells_size {
			return Err(CellError::Malformed(format!(
				"cell data is {} bytes, header declares {}",
				reader.pos - cells_start,
				total_cells_size
			)));
		}

		Ok(Self { cells, roots })
	}

	fn parse_cell(
		reader: &mut ByteReader<'_>,
		index: usize,
		cell_count: usize,
		ref_size: usize,
	) -> Result<Cell, CellError> {
		let d1 = reader.byte()?;
		let d2 = reader.byte()?;

		let ref_count = (d1 & 0x07) as usize;
		if ref_count > MAX_CELL_REFS {
			return Err(CellError::Malformed(format!(
				"cell {} has {} references",
				index, ref_count
			)));
		}
		if d1 & 0x10 != 0 {
			let levels = (d1 >> 5).count_ones() as usize + 1;
			reader.take(levels * (32 + 2))?;
		}

		let data_len = (d2 as usize).div_ceil(2);
		let data = reader.take(data_len)?.to_vec();
		let bit_len = if d2 % 2 == 0 {
			data_len * 8
		} else {
			let last = data[data_len - 1];
			if last == 0 {
				return Err(CellError::Malformed(format!(
					"cell {} is missing its completion tag",
					index
				)));
			}
			data_len * 8 - (last.trailing_zeros() as usize + 1)
		};
		if bit_len > MAX_CELL_BITS {
			return Err(CellError::Malformed(format!(
				"cell {} holds {} bits",
				index, bit_len
			)));
		}

		let mut refs = Vec::with_capacity(ref_count);
		for _ in 0..ref_count {
			let target = reader.uint(ref_size)?;
			if target <= index || target >= cell_count {
				return Err(CellError::Malformed(format!(
					"cell {} references invalid cell {}",
					index, target
				)));
			}
			refs.push(target);
		}

		Ok(Cell {
			data,
			bit_len,
			refs,
		})
	}

	/// The first root cell.
	pub fn root(&self) -> &Cell {
		&self.cells[self.roots[0]]
	}

	pub fn cell(&self, index: usize) -> Option<&Cell> {
		self.cells.get(index)
	}
}

/// Cursor over the data bits of a cell.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
	data: &'a [u8],
	bit_len: usize,
	pos: usize,
}

impl CellSlice<'_> {
	pub fn remaining_bits(&self) -> usize {
		self.bit_len - self.pos
	}

	fn ensure(&self, wanted: usize) -> Result<(), CellError> {
		if wanted > self.remaining_bits() {
			return Err(CellError::Underflow {
				wanted,
				remaining: self.remaining_bits(),
			});
		}
		Ok(())
	}

	pub fn load_bit(&mut self) -> Result<bool, CellError> {
		self.ensure(1)?;
		let bit = (self.data[self.pos / 8] >> (7 - self.pos % 8)) & 1 == 1;
		self.pos += 1;
		Ok(bit)
	}

	/// Load an unsigned big-endian integer of up to 128 bits.
	pub fn load_uint(&mut self, bits: usize) -> Result<u128, CellError> {
		assert!(bits <= 128, "load_uint supports at most 128 bits");
		self.ensure(bits)?;
		let mut value = 0u128;
		for _ in 0..bits {
			value = (value << 1) | self.load_bit()? as u128;
		}
		Ok(value)
	}

	pub fn load_u32(&mut self) -> Result<u32, CellError> {
		Ok(self.load_uint(32)? as u32)
	}

	pub fn load_u64(&mut self) -> Result<u64, CellError> {
		Ok(self.load_uint(64)? as u64)
	}

	/// Load a `Coins` value (`VarUInteger 16`): a 4-bit byte length followed by the value.
	pub fn load_coins(&mut self) -> Result<u128, CellError> {
		let len = self.load_uint(4)? as usize;
		self.load_uint(len * 8)
	}

	/// Load a `MsgAddressInt` in its standard, non-anycast form.
	pub fn load_address(&mut self) -> Result<AccountAddress, CellError> {
		let tag = self.load_uint(2)? as u8;
		if tag != 0b10 {
			return Err(CellError::UnsupportedAddress(tag));
		}
		if self.load_bit()? {
			return Err(CellError::UnsupportedAddress(tag));
		}
		let workchain = self.load_uint(8)? as u8 as i8;
		let mut hash = [0u8; 32];
		for byte in hash.iter_mut() {
			*byte = self.load_uint(8)? as u8;
		}
		Ok(AccountAddress::new(workchain, hash))
	}
}

/// Builders for serialized cells, used by tests across the crate.
#[cfg(test)]
pub(crate) mod test_utils {
	use super::*;

	#[derive(Default)]
	pub struct CellBuilder {
		bits: Vec<bool>,
	}

	impl CellBuilder {
		pub fn new() -> Self {
			Self::default()
		}

		pub fn store_uint(mut self, value: u128, bits: usize) -> Self {
			for i in (0..bits).rev() {
				self.bits.push((value >> i) & 1 == 1);
			}
			self
		}

		pub fn store_coins(self, value: u128) -> Self {
			let len = (128 - value.leading_zeros() as usize).div_ceil(8);
			self.store_uint(len as u128, 4).store_uint(value, len * 8)
		}

		pub fn store_address(self, address: &AccountAddress) -> Self {
			let mut builder = self
				.store_uint(0b10, 2)
				.store_uint(0, 1)
				.store_uint(address.workchain as u8 as u128, 8);
			for byte in address.hash {
				builder = builder.store_uint(byte as u128, 8);
			}
			builder
		}

		/// Serialize as a single-root, reference-free bag of cells.
		pub fn to_boc(&self) -> Vec<u8> {
			let bit_len = self.bits.len();
			let mut bits = self.bits.clone();
			if bit_len % 8 != 0 {
				bits.push(true);
				while bits.len() % 8 != 0 {
					bits.push(false);
				}
			}
			let data: Vec<u8> = bits
				.chunks(8)
				.map(|chunk| chunk.iter().fold(0u8, |acc, bit| (acc << 1) | *bit as u8))
				.collect();
			let d2 = (bit_len / 8 + bit_len.div_ceil(8)) as u8;

			let mut out = BOC_GENERIC_MAGIC.to_vec();
			out.push(0x01); // no index, no crc, 1-byte references
			out.push(0x01); // 1-byte offsets
			out.push(1); // cells
			out.push(1); // roots
			out.push(0); // absent
			out.push((2 + data.len()) as u8);
			out.push(0); // root index
			out.push(0); // d1: no refs, ordinary, level 0
			out.push(d2);
			out.extend_from_slice(&data);
			out
		}
	}
}
