//! Archive container detection.
//!
//! Uploads must be one of the recognized archive container formats. Only the
//! leading bytes are inspected; the contents are never unpacked server-side.

/// Recognized archive container formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    SevenZip,
    Rar,
    Gzip,
}

impl ArchiveKind {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::Rar => "rar",
            Self::Gzip => "gzip",
        }
    }
}

/// Number of leading bytes needed to classify a payload.
pub const SNIFF_LEN: usize = 8;

/// Classify the leading bytes of a payload.
///
/// Returns `Error::NotAnArchive` when the bytes match none of the recognized
/// containers or fewer than [`SNIFF_LEN`] bytes are available.
pub fn sniff(leading: &[u8]) -> crate::Result<ArchiveKind> {
    if leading.len() < SNIFF_LEN {
        return Err(crate::Error::NotAnArchive);
    }
    // Empty zip archives (PK\x05\x06) are deliberately not accepted.
    if leading.starts_with(b"PK\x03\x04") {
        return Ok(ArchiveKind::Zip);
    }
    if leading.starts_with(&[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c]) {
        return Ok(ArchiveKind::SevenZip);
    }
    // Rar4 and Rar5 share the first six bytes.
    if leading.starts_with(b"Rar!\x1a\x07") {
        return Ok(ArchiveKind::Rar);
    }
    if leading.starts_with(&[0x1f, 0x8b]) {
        return Ok(ArchiveKind::Gzip);
    }
    Err(crate::Error::NotAnArchive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_zip() {
        let data = b"PK\x03\x04rest-of-archive";
        assert_eq!(sniff(data).unwrap(), ArchiveKind::Zip);
    }

    #[test]
    fn test_sniff_seven_zip() {
        let data = [0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c, 0x00, 0x04];
        assert_eq!(sniff(&data).unwrap(), ArchiveKind::SevenZip);
    }

    #[test]
    fn test_sniff_rar_both_versions() {
        assert_eq!(sniff(b"Rar!\x1a\x07\x00\x00").unwrap(), ArchiveKind::Rar);
        assert_eq!(sniff(b"Rar!\x1a\x07\x01\x00").unwrap(), ArchiveKind::Rar);
    }

    #[test]
    fn test_sniff_gzip() {
        let data = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(sniff(&data).unwrap(), ArchiveKind::Gzip);
    }

    #[test]
    fn test_sniff_rejects_plain_data() {
        assert!(sniff(b"hello world").is_err());
    }

    #[test]
    fn test_sniff_rejects_short_input() {
        assert!(sniff(b"PK\x03\x04").is_err());
        assert!(sniff(b"").is_err());
    }
}
