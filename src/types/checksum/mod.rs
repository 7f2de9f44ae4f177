#![forbid(unsafe_code)]

/// CRC32 over a cursor's version byte followed by its key payload.
pub fn cursor_crc32(version: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[version]);
    hasher.update(payload);
    hasher.finalize()
}
