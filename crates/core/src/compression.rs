//! Packagers: the compression layer applied to file and sticker payloads.
//!
//! The codec never compresses anything itself. Transfers hand raw chunk data
//! to whoever owns the file, and that owner unpacks it with the protocol's
//! packager.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Reversible transform applied to transferred file data
pub trait Packager: Send + Sync {
    fn pack(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    fn unpack(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// Gzip with default compression, used by protocol v1
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipPackager;

impl Packager for GzipPackager {
    fn pack(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn unpack(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Leaves data untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPackager;

impl Packager for PassthroughPackager {
    fn pack(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn unpack(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}
