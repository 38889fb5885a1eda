use crate::color::Color;

use super::MARKER;

/// Builds one outgoing frame.
///
/// The length slot is reserved up front and patched by [`FrameWriter::finish`],
/// which also appends the CRC over the payload span.
#[derive(Debug)]
pub struct FrameWriter {
    bytes: Vec<u8>,
    payload_start: usize,
}

impl FrameWriter {
    pub fn new(name: &str) -> Self {
        let mut bytes = Vec::with_capacity(MARKER.len() + name.len() + 64);
        bytes.extend_from_slice(MARKER);
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&[0; 4]);
        let payload_start = bytes.len();
        FrameWriter {
            bytes,
            payload_start,
        }
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_colors(&mut self, colors: &[Color]) -> &mut Self {
        for color in colors {
            self.put_u32(color.pack());
        }
        self
    }

    /// Patch the length slot and append the CRC.
    pub fn finish(mut self) -> Vec<u8> {
        let payload_len = (self.bytes.len() - self.payload_start) as u32;
        let slot = self.payload_start - 4;
        self.bytes[slot..self.payload_start].copy_from_slice(&payload_len.to_le_bytes());
        let crc = crc32fast::hash(&self.bytes[self.payload_start..]);
        self.bytes.extend_from_slice(&crc.to_le_bytes());
        self.bytes
    }
}

/// Cursor over a little-endian payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        PayloadReader { bytes, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take4(&mut self) -> Option<[u8; 4]> {
        let end = self.position + 4;
        let word = self.bytes.get(self.position..end)?;
        self.position = end;
        word.try_into().ok()
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take4().map(u32::from_le_bytes)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.take4().map(i32::from_le_bytes)
    }

    pub fn f32(&mut self) -> Option<f32> {
        self.take4().map(f32::from_le_bytes)
    }

    /// Every remaining whole word as a color; a trailing partial word is
    /// ignored.
    pub fn colors(&mut self) -> Vec<Color> {
        let mut colors = Vec::with_capacity(self.remaining() / 4);
        while let Some(value) = self.u32() {
            colors.push(Color::from_packed(value));
        }
        colors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut writer = FrameWriter::new("Rainbow");
        writer.put_u32(157).put_f32(2.5);
        let frame = writer.finish();

        assert!(frame.starts_with(b"##HEADER##Rainbow\0"));
        let len_at = MARKER.len() + "Rainbow".len() + 1;
        assert_eq!(&frame[len_at..len_at + 4], &8u32.to_le_bytes());

        let payload = &frame[len_at + 4..len_at + 12];
        assert_eq!(&payload[..4], &157u32.to_le_bytes());
        assert_eq!(&payload[4..], &2.5f32.to_le_bytes());

        let crc = u32::from_le_bytes(frame[len_at + 12..].try_into().unwrap());
        assert_eq!(crc, crc32fast::hash(payload));
    }

    #[test]
    fn test_empty_payload_crc_is_zero() {
        let frame = FrameWriter::new("Status").finish();
        assert_eq!(&frame[frame.len() - 8..], &[0u8; 8]);
    }

    #[test]
    fn test_crc_detects_any_single_bit_flip() {
        let payload: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(37)).collect();
        let reference = crc32fast::hash(&payload);
        for bit in 0..payload.len() * 8 {
            let mut flipped = payload.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert_ne!(crc32fast::hash(&flipped), reference, "bit {bit}");
        }
    }

    #[test]
    fn test_reader_stops_at_partial_word() {
        let bytes = [1, 0, 0, 0, 0xff, 0xee];
        let mut reader = PayloadReader::new(&bytes);
        assert_eq!(reader.u32(), Some(1));
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.u32(), None);
        assert!(reader.colors().is_empty());
    }
}
