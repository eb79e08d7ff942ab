// files.rs -- PAK archive access

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use rayon::prelude::*;

use crate::common::{com_dprintf, com_printf};
use crate::error::{LoadError, LoadResult};
use crate::qfiles::{DPackFile, DPackHeader, IDPAKHEADER, MAX_FILES_IN_PACK, PACK_FILE_SIZE, PACK_HEADER_SIZE};

/// Directories with at least this many entries are parsed in parallel.
const PARALLEL_THRESHOLD: usize = 64;

// ============================================================
// In-memory structures
// ============================================================

/// A file entry within a pack file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackFile {
    pub name: String,
    pub filepos: u32,
    pub filelen: u32,
}

/// An opened .pak archive. Entries are read on demand from `handle`.
#[derive(Debug)]
pub struct Pack<R = BufReader<File>> {
    pub filename: String,
    pub files: Vec<PackFile>,
    /// lowercase filename -> index in files
    file_index: HashMap<String, usize>,
    handle: R,
}

impl Pack<BufReader<File>> {
    /// Open a .pak file from disk and read its directory.
    pub fn open(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|_| LoadError::FileNotFound(path.display().to_string()))?;
        Self::from_reader(path.display().to_string(), BufReader::new(file))
    }
}

impl<R: Read + Seek> Pack<R> {
    /// Read the header and directory of a pack from any seekable stream.
    pub fn from_reader(filename: String, mut handle: R) -> LoadResult<Self> {
        let mut header = [0u8; PACK_HEADER_SIZE];
        handle
            .read_exact(&mut header)
            .map_err(|_| LoadError::Truncated(filename.clone()))?;

        let DPackHeader { ident, dirofs, dirlen } = DPackHeader::parse(&header);
        if ident != IDPAKHEADER {
            return Err(LoadError::BadMagic { what: filename, found: ident });
        }
        if dirofs < 0 || dirlen < 0 {
            return Err(LoadError::Truncated(filename));
        }

        let numpackfiles = dirlen as usize / PACK_FILE_SIZE;
        if numpackfiles > MAX_FILES_IN_PACK {
            com_printf(&format!("{} has {} files\n", filename, numpackfiles));
        }

        let mut directory = vec![0u8; numpackfiles * PACK_FILE_SIZE];
        handle.seek(SeekFrom::Start(dirofs as u64))?;
        handle
            .read_exact(&mut directory)
            .map_err(|_| LoadError::Truncated(filename.clone()))?;

        let parse_entry = |entry: &[u8]| {
            let dpf = DPackFile::parse(entry);
            PackFile {
                name: dpf.name(),
                filepos: dpf.filepos as u32,
                filelen: dpf.filelen as u32,
            }
        };

        let files: Vec<PackFile> = if numpackfiles >= PARALLEL_THRESHOLD {
            directory.par_chunks_exact(PACK_FILE_SIZE).map(parse_entry).collect()
        } else {
            directory.chunks_exact(PACK_FILE_SIZE).map(parse_entry).collect()
        };

        com_printf(&format!("Added {} ({} files)\n", filename, numpackfiles));
        Ok(Self::new(filename, files, handle))
    }

    fn new(filename: String, files: Vec<PackFile>, handle: R) -> Self {
        let file_index = files
            .iter()
            .enumerate()
            .map(|(i, pf)| (pf.name.to_lowercase(), i))
            .collect();
        Self {
            filename,
            files,
            file_index,
            handle,
        }
    }

    /// Finds a file by name (case-insensitive).
    #[inline]
    pub fn find_file(&self, filename: &str) -> Option<&PackFile> {
        self.file_index
            .get(&filename.to_lowercase())
            .map(|&idx| &self.files[idx])
    }

    /// Read a whole entry into memory.
    pub fn load_file(&mut self, filename: &str) -> LoadResult<Vec<u8>> {
        let entry = self
            .find_file(filename)
            .cloned()
            .ok_or_else(|| LoadError::FileNotFound(filename.to_string()))?;

        com_dprintf(&format!("PackFile: {} : {}\n", self.filename, entry.name));

        let mut buf = vec![0u8; entry.filelen as usize];
        self.handle.seek(SeekFrom::Start(entry.filepos as u64))?;
        self.handle
            .read_exact(&mut buf)
            .map_err(|_| LoadError::Truncated(format!("{}:{}", self.filename, entry.name)))?;
        Ok(buf)
    }
}

// ============================================================
// Tests
// ============================================================
