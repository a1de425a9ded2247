//! Archive formats for cache payloads.

mod tarball;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use stash_core::{Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Archive format of a cache payload.
///
/// `TarGz` is the tar codec wrapped in a gzip stream on both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Pick the format from the archive file name suffix.
    pub fn from_filename(name: &str) -> Result<Self> {
        if name.ends_with(".tar") {
            Ok(ArchiveFormat::Tar)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Ok(ArchiveFormat::TarGz)
        } else {
            Err(Error::UnsupportedFormat(name.to_string()))
        }
    }

    /// Archive `sources` into `sink`.
    ///
    /// Every source must exist. On error the bytes already written to `sink`
    /// do not form a usable archive.
    pub fn pack(&self, sources: &[PathBuf], sink: &mut dyn Write) -> Result<()> {
        match self {
            ArchiveFormat::Tar => tarball::pack(sources, sink),
            ArchiveFormat::TarGz => {
                let mut encoder = GzEncoder::new(sink, Compression::default());
                tarball::pack(sources, &mut encoder)?;
                encoder.finish().map_err(Error::Io)?;
                Ok(())
            }
        }
    }

    /// Restore an archive read from `source` below `destination`.
    ///
    /// Reads `source` to its end even after the last record so a streaming
    /// writer on the other side is never cut off.
    pub fn unpack(&self, destination: &Path, source: &mut dyn Read) -> Result<()> {
        match self {
            ArchiveFormat::Tar => tarball::unpack(destination, &mut *source)?,
            ArchiveFormat::TarGz => {
                let mut decoder = GzDecoder::new(&mut *source);
                tarball::unpack(destination, &mut decoder)?;
                drain(&mut decoder)?;
            }
        }
        drain(source)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Tar => write!(f, "tar"),
            ArchiveFormat::TarGz => write!(f, "tar.gz"),
        }
    }
}

fn drain(reader: &mut dyn Read) -> Result<()> {
    io::copy(reader, &mut io::sink()).map_err(Error::Io)?;
    Ok(())
}
