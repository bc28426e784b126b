//! Archive signature sniffing from a short byte prefix

use std::io::Read;
use std::path::Path;

/// Zip local file header (`PK\x03\x04`), the first bytes of any non-empty zip or ipa
pub const ZIP_LOCAL_FILE_HEADER: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Zip end-of-central-directory record, the first bytes of an empty zip
pub const ZIP_EMPTY_ARCHIVE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];

/// Zip spanned archive marker
pub const ZIP_SPANNED_ARCHIVE: [u8; 4] = [0x50, 0x4B, 0x07, 0x08];

/// gzip member header, used for compressed tarballs
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// ustar magic inside a tar header block
pub const USTAR_MAGIC: &[u8; 5] = b"ustar";

/// Offset of [`USTAR_MAGIC`] within the first tar header block
pub const USTAR_MAGIC_OFFSET: usize = 257;

/// Number of bytes [`classify`] looks at
pub const SIGNATURE_PREFIX_LEN: usize = 512;

/// Archive family deduced from a header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// Nothing recognisable
    #[default]
    Unknown,
    /// tar, plain or gzip-compressed
    Tar,
    /// zip and zip-based packages (ipa, jar, ...)
    ZipFamily,
}

/// Classify a byte prefix.
///
/// Total: short, empty or unrecognised input is [`SignatureKind::Unknown`].
pub fn classify(data: &[u8]) -> SignatureKind {
    let data = &data[..data.len().min(SIGNATURE_PREFIX_LEN)];
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] | [0x50, 0x4B, 0x07, 0x08, ..] => {
            SignatureKind::ZipFamily
        }
        [0x1F, 0x8B, ..] => SignatureKind::Tar,
        _ if has_ustar_magic(data) => SignatureKind::Tar,
        _ => SignatureKind::Unknown,
    }
}

fn has_ustar_magic(data: &[u8]) -> bool {
    data.get(USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + USTAR_MAGIC.len())
        .is_some_and(|magic| magic == USTAR_MAGIC)
}

/// Classify the first bytes of a file.
///
/// A file that is missing, unreadable or empty is [`SignatureKind::Unknown`].
pub fn classify_file(path: &Path) -> SignatureKind {
    let Ok(file) = std::fs::File::open(path) else {
        return SignatureKind::Unknown;
    };
    let mut prefix = Vec::with_capacity(SIGNATURE_PREFIX_LEN);
    match file
        .take(SIGNATURE_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)
    {
        Ok(_) => classify(&prefix),
        Err(_) => SignatureKind::Unknown,
    }
}
