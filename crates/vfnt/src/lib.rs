//! FreeBSD vt console font (`.fnt`) parser and kernel-format emitter.
//!
//! The on-disk `vfnt` format is:
//!
//! ```text
//! header
//!   . char[8] magic ("VFNT0002")
//!   . u8      width
//!   . u8      height
//!   . u16     pad
//!   . u32     glyph count
//!   . u32[4]  map count
//!
//! glyph data
//!   . u8[]    bitmap
//!
//! font mappings (4 tables, map count entries each)
//!   . u32     src
//!   . u16     dst
//!   . u16     len
//! ```
//!
//! All multi-byte fields are stored **big-endian** and are byte-swapped on
//! read. The bitmap is `glyph_count * ceil(width / 8) * height` bytes. The
//! four mapping tables are normal, normal-right, bold, and bold-right.
//!
//! [`Font::to_kernel_blob`] re-emits the font in the in-kernel memory
//! format: a `font_info` header (checksum, width, height, bitmap size, map
//! counts) in host byte order, the four mapping tables, then the bitmap.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

/// On-disk magic for the vfnt version 2 format.
pub const VFNT_MAGIC: [u8; 8] = *b"VFNT0002";

/// Number of glyph mapping tables (normal, normal-right, bold, bold-right).
pub const VFNT_MAPS: usize = 4;

/// Size of the on-disk header in bytes.
const VFNT_HEADER_SIZE: usize = 32;

/// Size of one on-disk (and in-kernel) mapping entry in bytes.
const VFNT_MAP_SIZE: usize = 8;

/// Size of the in-kernel `font_info` header in bytes.
const FONT_INFO_SIZE: usize = 32;

/// Errors that can occur when parsing a font file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontError {
    /// The file does not start with the `VFNT0002` magic.
    BadMagic,
    /// The input data is too short for the declared glyphs or mappings.
    Truncated,
    /// The file has bytes left over after the last mapping table.
    TrailingData,
}

impl fmt::Display for FontError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "format error: not a VFNT0002 font"),
            Self::Truncated => write!(f, "font data truncated"),
            Self::TrailingData => write!(f, "trailing bytes after font data"),
        }
    }
}

/// One glyph mapping entry: maps `len + 1` consecutive source code points
/// starting at `src` to glyph indices starting at `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfntMap {
    /// First source code point.
    pub src: u32,
    /// First destination glyph index.
    pub dst: u16,
    /// Number of additional consecutive mappings.
    pub len: u16,
}

/// A parsed console font.
#[derive(Debug, Clone, PartialEq)]
pub struct Font {
    /// Glyph width in pixels.
    pub width: u8,
    /// Glyph height in pixels.
    pub height: u8,
    /// Number of glyphs in the bitmap.
    pub glyph_count: u32,
    /// Entry counts for the four mapping tables.
    pub map_count: [u32; VFNT_MAPS],
    /// The four mapping tables.
    pub maps: [Vec<VfntMap>; VFNT_MAPS],
    /// Raw glyph bitmap, `glyph_count * ceil(width / 8) * height` bytes.
    pub bitmap: Vec<u8>,
}

/// Read a big-endian `u32` from `data` at byte offset `off`.
fn be_u32(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes(*data[off..].first_chunk().unwrap())
}

/// Read a big-endian `u16` from `data` at byte offset `off`.
fn be_u16(data: &[u8], off: usize) -> u16 {
    u16::from_be_bytes(*data[off..].first_chunk().unwrap())
}

impl Font {
    /// Parse a font from raw (already decompressed) `.fnt` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FontError`] on a bad magic, short input, or trailing bytes.
    pub fn parse(data: &[u8]) -> Result<Self, FontError> {
        if data.len() < VFNT_HEADER_SIZE {
            return Err(FontError::Truncated);
        }
        if data[..8] != VFNT_MAGIC {
            return Err(FontError::BadMagic);
        }

        let width = data[8];
        let height = data[9];
        // pad at 10..12 — skipped
        let glyph_count = be_u32(data, 12);
        let mut map_count = [0u32; VFNT_MAPS];
        for (i, count) in map_count.iter_mut().enumerate() {
            *count = be_u32(data, 16 + i * 4);
        }

        let mut index = VFNT_HEADER_SIZE;

        // Glyph bitmap: width rounded up to whole bytes, times height, per glyph.
        let glyph_bytes = (usize::from(width)).div_ceil(8) * usize::from(height);
        let bitmap_size = glyph_count as usize * glyph_bytes;
        if data.len() < index + bitmap_size {
            return Err(FontError::Truncated);
        }
        let bitmap = data[index..index + bitmap_size].to_vec();
        index += bitmap_size;

        let mut maps: [Vec<VfntMap>; VFNT_MAPS] = core::array::from_fn(|_| Vec::new());
        for (i, map) in maps.iter_mut().enumerate() {
            let entries = map_count[i] as usize;
            if data.len() < index + entries * VFNT_MAP_SIZE {
                return Err(FontError::Truncated);
            }
            map.reserve(entries);
            for _ in 0..entries {
                map.push(VfntMap {
                    src: be_u32(data, index),
                    dst: be_u16(data, index + 4),
                    len: be_u16(data, index + 6),
                });
                index += VFNT_MAP_SIZE;
            }
        }

        if index != data.len() {
            return Err(FontError::TrailingData);
        }

        Ok(Self {
            width,
            height,
            glyph_count,
            map_count,
            maps,
            bitmap,
        })
    }

    /// Returns the bitmap size in bytes, as carried in the kernel header.
    #[must_use]
    pub fn bitmap_size(&self) -> u32 {
        self.bitmap.len() as u32
    }

    /// Returns the `font_info` checksum: the two's-complement negation of
    /// the 32-bit sum of width, height, bitmap size, and the map counts.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        let mut sum = u32::from(self.width);
        sum = sum.wrapping_add(u32::from(self.height));
        sum = sum.wrapping_add(self.bitmap_size());
        for count in self.map_count {
            sum = sum.wrapping_add(count);
        }
        sum.wrapping_neg()
    }

    /// Emit the font in the in-kernel memory format.
    ///
    /// Layout: `font_info` header (checksum, width, height, bitmap size,
    /// map counts — all host byte order), the four mapping tables
    /// concatenated (entries in host byte order), then the glyph bitmap.
    #[must_use]
    pub fn to_kernel_blob(&self) -> Vec<u8> {
        let map_bytes: usize = self
            .map_count
            .iter()
            .map(|&c| c as usize * VFNT_MAP_SIZE)
            .sum();
        let mut blob = Vec::with_capacity(FONT_INFO_SIZE + map_bytes + self.bitmap.len());

        blob.extend_from_slice(&self.checksum().to_ne_bytes());
        blob.extend_from_slice(&u32::from(self.width).to_ne_bytes());
        blob.extend_from_slice(&u32::from(self.height).to_ne_bytes());
        blob.extend_from_slice(&self.bitmap_size().to_ne_bytes());
        for count in self.map_count {
            blob.extend_from_slice(&count.to_ne_bytes());
        }

        for map in &self.maps {
            for entry in map {
                blob.extend_from_slice(&entry.src.to_ne_bytes());
                blob.extend_from_slice(&entry.dst.to_ne_bytes());
                blob.extend_from_slice(&entry.len.to_ne_bytes());
            }
        }

        blob.extend_from_slice(&self.bitmap);
        blob
    }
}
