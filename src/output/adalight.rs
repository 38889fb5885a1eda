/// Build an Adalight frame: `'Ada'`, led count - 1 (big endian), checksum,
/// then the pixel bytes.
pub fn build_adalight_frame(pixel_data: &[u8], stride: usize) -> Vec<u8> {
    let led_count = (pixel_data.len() / stride).max(1);
    let count = (led_count - 1) as u16;
    let [count_hi, count_lo] = count.to_be_bytes();
    let checksum = count_hi ^ count_lo ^ 0x55;

    let mut frame = Vec::with_capacity(6 + pixel_data.len());
    frame.extend_from_slice(b"Ada");
    frame.push(count_hi);
    frame.push(count_lo);
    frame.push(checksum);
    frame.extend_from_slice(pixel_data);
    frame
}
