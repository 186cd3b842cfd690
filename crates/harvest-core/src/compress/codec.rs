use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Suffix of compressed artifacts.
pub const GZ_SUFFIX: &str = ".gz";

/// `<path>.gz`
pub fn gz_path(raw: &Path) -> PathBuf {
    let mut o = raw.as_os_str().to_owned();
    o.push(GZ_SUFFIX);
    PathBuf::from(o)
}

pub(crate) fn gzip_bytes(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity((bytes.len() / 4).max(256)),
        Compression::new(level.min(9)),
    );
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub(crate) fn gunzip_bytes(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(std::io::Cursor::new(bytes));
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
