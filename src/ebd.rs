use crate::device::ColorDepth;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use byteorder::{BigEndian, WriteBytesExt};

/// URI scheme prefix carried by rewritten `SRC` attributes. The payload
/// after it is the base64-encoded wire form of an [`EbdImage`].
pub const DATA_PREFIX: &str = "data:image/x-ebd;base64,";

/// A transcoded image ready for inlining: palette indices packed at the
/// device's color depth.
///
/// Invariant: `row_bytes(width, depth) * height == data.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbdImage {
    pub width: u16,
    pub height: u16,
    pub depth: ColorDepth,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("pixel index {index} does not fit in {depth}")]
pub struct InvalidPixelIndex {
    pub index: u8,
    pub depth: ColorDepth,
}

/// Bytes per packed row: rows are padded to a whole byte boundary.
pub fn row_bytes(width: u16, depth: ColorDepth) -> usize {
    (width as usize * depth.bits_per_pixel() as usize).div_ceil(8)
}

/// Packs palette indices into the EBDImage bitstream: MSB-first within each
/// byte, rows padded to a byte boundary, top-to-bottom. Quantization is the
/// caller's responsibility; any index exceeding `2^depth - 1` is an error.
pub fn encode(indices: &[u8], width: u16, height: u16, depth: ColorDepth) -> Result<EbdImage, InvalidPixelIndex> {
    debug_assert_eq!(indices.len(), width as usize * height as usize);
    let bpp = depth.bits_per_pixel();
    let max_index = if bpp == 8 { u8::MAX } else { (1 << bpp) - 1 };

    let stride = row_bytes(width, depth);
    let mut data = vec![0; stride * height as usize];
    for (row, row_indices) in indices.chunks_exact(width as usize).enumerate() {
        let row_start = row * stride;
        for (column, &index) in row_indices.iter().enumerate() {
            if index > max_index {
                return Err(InvalidPixelIndex { index, depth });
            }
            let bit_offset = column * bpp as usize;
            let shift = 8 - bpp - (bit_offset % 8) as u8;
            data[row_start + bit_offset / 8] |= index << shift;
        }
    }

    Ok(EbdImage { width, height, depth, data })
}

impl EbdImage {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Serializes into the inline `SRC` form the client decodes: a one-byte
    /// depth, big-endian width and height, and the packed pixel bytes, all
    /// base64-encoded under [`DATA_PREFIX`].
    pub fn serialize(&self) -> String {
        let mut wire = Vec::with_capacity(5 + self.data.len());
        wire.write_u8(self.depth.bits_per_pixel()).expect("vec write is infallible");
        wire.write_u16::<BigEndian>(self.width).expect("vec write is infallible");
        wire.write_u16::<BigEndian>(self.height).expect("vec write is infallible");
        wire.extend_from_slice(&self.data);

        let mut out = String::from(DATA_PREFIX);
        BASE64.encode_string(&wire, &mut out);
        out
    }

    /// Inverse of the packer. Test support for round-trip checks.
    #[cfg(test)]
    pub fn unpack(&self) -> Vec<u8> {
        let bpp = self.depth.bits_per_pixel();
        let mask = if bpp == 8 { u8::MAX } else { (1 << bpp) - 1 };
        let stride = row_bytes(self.width, self.depth);

        let mut indices = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in 0..self.height as usize {
            for column in 0..self.width as usize {
                let bit_offset = column * bpp as usize;
                let shift = 8 - bpp - (bit_offset % 8) as u8;
                let byte = self.data[row * stride + bit_offset / 8];
                indices.push((byte >> shift) & mask);
            }
        }
        indices
    }
}
