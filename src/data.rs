use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::buffer::{Buffer, BufferFlags};
use crate::error::Error;
use crate::page::{Backing, Page, MAX_PAGE_SIZE};

/// Chunk size for streamed loads and saves.
pub const IOBUF_SIZE: usize = 32768;

/// Files at least this big are loaded through the mmap fast path.
pub const MIN_MMAP_SIZE: u64 = 1024 * 1024;

/// Load/save/close plug deciding how a buffer's bytes map to a file.
///
/// The engine ships the raw type, which treats the file as the byte stream
/// it is. Editors register richer types (archives, images, …) and install
/// them with [`Buffer::set_data_type`].
pub trait DataType {
    /// Short identifier, for diagnostics.
    fn name(&self) -> &'static str;

    /// Fills `buffer` from an open file.
    fn load(&self, buffer: &mut Buffer, file: &mut File) -> io::Result<()>;

    /// Writes `buffer` to the file at `path`.
    fn save(&self, buffer: &Buffer, path: &Path) -> io::Result<()>;

    /// Releases whatever the type attached to the buffer.
    fn close(&self, buffer: &mut Buffer);
}

/// The built-in data type: the buffer holds the file bytes verbatim.
pub struct RawData;

/// The data type every new buffer starts with.
pub static RAW_DATA: RawData = RawData;

impl DataType for RawData {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn load(&self, buffer: &mut Buffer, file: &mut File) -> io::Result<()> {
        let meta = file.metadata()?;
        if meta.len() >= MIN_MMAP_SIZE {
            match map_file(buffer, file) {
                Ok(()) => return Ok(()),
                // identical observable semantics, just slower
                Err(err) => log::debug!("mmap failed ({}), streaming instead", err),
            }
        }
        stream_load(buffer, file, 0)
    }

    fn save(&self, buffer: &Buffer, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        let mut chunk = vec![0u8; IOBUF_SIZE];
        let mut offset = 0;
        while offset < buffer.len() {
            let len = buffer.read(offset, &mut chunk);
            file.write_all(&chunk[..len])?;
            offset += len;
        }
        Ok(())
    }

    fn close(&self, _buffer: &mut Buffer) {}
}

/// Reads `file` in [`IOBUF_SIZE`] chunks, inserting at a running offset.
pub(crate) fn stream_load(buffer: &mut Buffer, file: &mut File, mut offset: usize) -> io::Result<()> {
    let mut chunk = vec![0u8; IOBUF_SIZE];
    loop {
        let len = file.read(&mut chunk)?;
        if len == 0 {
            return Ok(());
        }
        buffer.insert(offset, &chunk[..len]);
        offset += len;
    }
}

/// Maps `file` read-only and installs its regions as shared pages.
///
/// No byte is copied up front; a page is copied out the first time it is
/// written. The mapping is released when the last page referencing it goes
/// away, wherever that page ended up.
pub(crate) fn map_file(buffer: &mut Buffer, file: &File) -> io::Result<()> {
    // SAFETY: The mapping is read-only and its lifetime is tied to the
    // backing Arc which every page created here holds. Truncation of the
    // file by another process while mapped is undefined behavior by nature
    // of mmap; the same caveat applies to any mapped read.
    let map = unsafe { Mmap::map(file)? };
    let total = map.len();
    let backing = Arc::new(Backing::Map(map));

    let mut pages = Vec::with_capacity((total + MAX_PAGE_SIZE - 1) / MAX_PAGE_SIZE);
    let mut start = 0;
    while start < total {
        let len = MAX_PAGE_SIZE.min(total - start);
        pages.push(Page::from_shared(Arc::clone(&backing), start, len));
        start += len;
    }
    buffer.replace_pages(pages, total);
    Ok(())
}

impl Buffer {
    /// Replaces the buffer contents with the file at `path`, through the
    /// buffer's data type.
    ///
    /// The load itself is never recorded: the undo history is dropped and
    /// the buffer comes out unmodified. On error the buffer keeps whatever
    /// state the partial load left; callers typically discard it.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let data_type = self.data_type;
        log::debug!("loading {:?} into {:?} via {}", path, self.name(), data_type.name());

        let mut file = File::open(path)?;
        self.invalidate_raw_data();
        self.flags.insert(BufferFlags::LOADING);
        let saved_log = self.save_log;
        self.save_log = false;
        let result = data_type.load(self, &mut file);
        self.save_log = saved_log;
        self.flags.remove(BufferFlags::LOADING);

        match result {
            Ok(()) => {
                self.modified = false;
                Ok(())
            }
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// Writes the buffer back to its file, through the buffer's data type.
    ///
    /// The previous file is kept as `{path}~`, its permission bits are
    /// carried over (best effort, unix only) and the undo history is
    /// dropped: a freshly saved buffer is unmodified.
    pub fn save(&mut self) -> Result<(), Error> {
        let path = self.filename.clone().ok_or(Error::NoFilename)?;
        let data_type = self.data_type;
        log::debug!("saving {:?} to {:?} via {}", self.name(), path, data_type.name());

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            fs::metadata(&path).map(|m| m.permissions().mode() & 0o777).unwrap_or(0o644)
        };

        // simple backup; a missing original is fine
        let mut backup = path.clone().into_os_string();
        backup.push("~");
        let _ = fs::rename(&path, &backup);

        self.flags.insert(BufferFlags::SAVING);
        let result = data_type.save(self, &path);
        self.flags.remove(BufferFlags::SAVING);
        result?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(mode));
        }

        self.log_reset();
        Ok(())
    }
}
