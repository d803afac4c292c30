//! Minimal reader for the scan-image binary format: an explicit-VR
//! little-endian tag directory from which only Rows, Columns, BitsAllocated
//! and PixelData are needed, plus the fixed 16→8 bit grayscale bucketing
//! used for previews. Everything else is skipped by length.

use anyhow::{bail, Context, Result};

const ROWS: (u16, u16) = (0x0028, 0x0010);
const COLUMNS: (u16, u16) = (0x0028, 0x0011);
const BITS_ALLOCATED: (u16, u16) = (0x0028, 0x0100);
const PIXEL_DATA: (u16, u16) = (0x7FE0, 0x0010);

/// Decoded frame as straight RGBA bytes.
pub struct TdrImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Map one 16-bit sample to its 8-bit grayscale level. Bucket 0 covers
/// samples 0..=255 and every later bucket spans the next 256 sample
/// values; the bucket index is the level.
pub fn level_for_sample(sample: u16) -> u8 {
    (sample >> 8) as u8
}

pub fn decode(bytes: &[u8]) -> Result<TdrImage> {
    let mut pos = prefix_offset(bytes).context("missing DICM magic")?;

    let mut rows: Option<u32> = None;
    let mut cols: Option<u32> = None;
    let mut bits: Option<u16> = None;
    let mut pixels: Option<&[u8]> = None;

    while pos + 8 <= bytes.len() {
        let group = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        let element = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]);
        let vr = [bytes[pos + 4], bytes[pos + 5]];
        let (header_len, value_len) =
            element_length(bytes, pos, vr).context("truncated element header")?;

        let start = pos + header_len;
        let end = start
            .checked_add(value_len as usize)
            .context("element length overflow")?;
        if end > bytes.len() {
            bail!(
                "element ({:04X},{:04X}) runs past end of file",
                group,
                element
            );
        }
        let value = &bytes[start..end];

        match (group, element) {
            ROWS => rows = Some(read_u16(value)? as u32),
            COLUMNS => cols = Some(read_u16(value)? as u32),
            BITS_ALLOCATED => bits = Some(read_u16(value)?),
            PIXEL_DATA => pixels = Some(value),
            _ => {}
        }
        pos = end;
    }

    let width = cols.context("missing Columns (0028,0011)")?;
    let height = rows.context("missing Rows (0028,0010)")?;
    let bits = bits.context("missing BitsAllocated (0028,0100)")?;
    let data = pixels.context("missing PixelData (7FE0,0010)")?;
    let count = width as usize * height as usize;

    let gray: Vec<u8> = match bits {
        16 => {
            if data.len() < count * 2 {
                bail!(
                    "pixel data too short: {} bytes for {}x{}x16",
                    data.len(),
                    width,
                    height
                );
            }
            data.chunks_exact(2)
                .take(count)
                .map(|c| level_for_sample(u16::from_le_bytes([c[0], c[1]])))
                .collect()
        }
        8 => {
            if data.len() < count {
                bail!(
                    "pixel data too short: {} bytes for {}x{}x8",
                    data.len(),
                    width,
                    height
                );
            }
            data[..count].to_vec()
        }
        other => bail!("BitsAllocated={} is not supported (only 8/16)", other),
    };

    // Grayscale level replicated into R, G, B with full opacity.
    let mut rgba = Vec::with_capacity(count * 4);
    for level in gray {
        rgba.extend_from_slice(&[level, level, level, 0xFF]);
    }

    Ok(TdrImage {
        width,
        height,
        rgba,
    })
}

fn prefix_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        return Some(132);
    }
    if bytes.len() >= 4 && &bytes[..4] == b"DICM" {
        return Some(4);
    }
    None
}

/// Header and value length for one explicit-VR element. Long-form VRs carry
/// two reserved bytes and a u32 length; everything else a u16 length.
fn element_length(bytes: &[u8], position: usize, vr: [u8; 2]) -> Option<(usize, u32)> {
    let uses_u32_len = matches!(
        vr,
        [b'O', b'B']
            | [b'O', b'D']
            | [b'O', b'F']
            | [b'O', b'L']
            | [b'O', b'W']
            | [b'S', b'Q']
            | [b'U', b'C']
            | [b'U', b'R']
            | [b'U', b'T']
            | [b'U', b'N']
    );

    if uses_u32_len {
        if position + 12 > bytes.len() {
            return None;
        }
        let value_len = u32::from_le_bytes([
            bytes[position + 8],
            bytes[position + 9],
            bytes[position + 10],
            bytes[position + 11],
        ]);
        if value_len == u32::MAX {
            // undefined length, not supported
            return None;
        }
        Some((12, value_len))
    } else {
        if position + 8 > bytes.len() {
            return None;
        }
        let value_len = u16::from_le_bytes([bytes[position + 6], bytes[position + 7]]) as u32;
        Some((8, value_len))
    }
}

fn read_u16(value: &[u8]) -> Result<u16> {
    if value.len() < 2 {
        bail!("short US value");
    }
    Ok(u16::from_le_bytes([value[0], value[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_us(group: u16, element: u16, value: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(b"US");
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    fn element_ow(group: u16, element: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&group.to_le_bytes());
        out.extend_from_slice(&element.to_le_bytes());
        out.extend_from_slice(b"OW");
        out.extend_from_slice(&[0, 0]); // reserved
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    fn tdr_bytes(width: u16, height: u16, samples: &[u16]) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");
        out.extend_from_slice(&element_us(0x0028, 0x0010, height));
        out.extend_from_slice(&element_us(0x0028, 0x0011, width));
        out.extend_from_slice(&element_us(0x0028, 0x0100, 16));
        let pixel_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        out.extend_from_slice(&element_ow(0x7FE0, 0x0010, &pixel_bytes));
        out
    }

    #[test]
    fn bucketing_boundaries() {
        assert_eq!(level_for_sample(0), 0);
        assert_eq!(level_for_sample(255), 0);
        assert_eq!(level_for_sample(256), 1);
        assert_eq!(level_for_sample(511), 1);
        assert_eq!(level_for_sample(512), 2);
        assert_eq!(level_for_sample(65535), 255);
    }

    #[test]
    fn decode_produces_replicated_gray_rgba() {
        let bytes = tdr_bytes(2, 1, &[0, 65535]);
        let img = decode(&bytes).unwrap();
        assert_eq!(img.width, 2);
        assert_eq!(img.height, 1);
        assert_eq!(img.rgba, vec![0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn decode_skips_unknown_elements() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        // An unrelated string element the reader must step over.
        bytes.extend_from_slice(&[0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x04, 0x00]);
        bytes.extend_from_slice(b"TDR ");
        bytes.extend_from_slice(&element_us(0x0028, 0x0010, 1));
        bytes.extend_from_slice(&element_us(0x0028, 0x0011, 1));
        bytes.extend_from_slice(&element_us(0x0028, 0x0100, 16));
        bytes.extend_from_slice(&element_ow(0x7FE0, 0x0010, &300u16.to_le_bytes()));

        let img = decode(&bytes).unwrap();
        assert_eq!((img.width, img.height), (1, 1));
        assert_eq!(img.rgba, vec![1, 1, 1, 255]);
    }

    #[test]
    fn decode_accepts_bare_magic() {
        let mut bytes = b"DICM".to_vec();
        bytes.extend_from_slice(&element_us(0x0028, 0x0010, 1));
        bytes.extend_from_slice(&element_us(0x0028, 0x0011, 1));
        bytes.extend_from_slice(&element_us(0x0028, 0x0100, 16));
        bytes.extend_from_slice(&element_ow(0x7FE0, 0x0010, &[0, 0]));
        assert!(decode(&bytes).is_ok());
    }

    #[test]
    fn decode_eight_bit_passthrough() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&element_us(0x0028, 0x0010, 1));
        bytes.extend_from_slice(&element_us(0x0028, 0x0011, 2));
        bytes.extend_from_slice(&element_us(0x0028, 0x0100, 8));
        bytes.extend_from_slice(&element_ow(0x7FE0, 0x0010, &[7, 200]));

        let img = decode(&bytes).unwrap();
        assert_eq!(img.rgba, vec![7, 7, 7, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn decode_rejects_missing_magic() {
        assert!(decode(b"not a scan file").is_err());
    }

    #[test]
    fn decode_rejects_missing_dimensions() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&element_us(0x0028, 0x0100, 16));
        bytes.extend_from_slice(&element_ow(0x7FE0, 0x0010, &[0, 0]));
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_short_pixel_data() {
        // 2x2 declared, one sample provided.
        let bytes = tdr_bytes(2, 2, &[42]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_element_past_end() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&bytes_with_bad_length());
        assert!(decode(&bytes).is_err());
    }

    fn bytes_with_bad_length() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x0028u16.to_le_bytes());
        out.extend_from_slice(&0x0010u16.to_le_bytes());
        out.extend_from_slice(b"US");
        out.extend_from_slice(&400u16.to_le_bytes()); // claims more than exists
        out.extend_from_slice(&[0, 0]);
        out
    }
}
