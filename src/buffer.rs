use std::cell::Cell;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bitflags::bitflags;

use crate::charset::{Charset, CHARSET_LATIN1};
use crate::data::{DataType, RAW_DATA};
use crate::page::{Page, MAX_PAGE_SIZE};
use crate::undo;

bitflags! {
    /// Buffer behavior flags.
    pub struct BufferFlags: u32 {
        /// The buffer must not be mutated. Mutators do not self-enforce
        /// this; checking is the caller's responsibility.
        const READ_ONLY = 1 << 0;
        /// The buffer is internal and hidden from user-facing listings.
        const SYSTEM = 1 << 1;
        /// Every mutation is recorded in the save log for undo.
        const SAVE_LOG = 1 << 2;
        /// Advisory: an external driver is loading the buffer.
        const LOADING = 1 << 3;
        /// Advisory: an external driver is saving the buffer.
        const SAVING = 1 << 4;
    }
}

/// The kind of a mutation, as seen by callbacks and save-log records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogOp {
    /// Bytes inserted before `offset`.
    Insert = 0,
    /// Bytes removed starting at `offset`.
    Delete = 1,
    /// Bytes overwritten in place at `offset`.
    Write = 2,
}

/// Token identifying a registered callback, for later removal.
pub type CallbackId = u64;

type CallbackFn = Box<dyn FnMut(&Buffer, LogOp, usize, usize)>;

/// A caller-owned offset kept in sync with buffer edits.
///
/// The tracked offset follows insertions and deletions before it, exactly
/// like the buffer's own mark. Obtained from [`Buffer::register_tracker`];
/// clones observe the same offset.
#[derive(Clone)]
pub struct OffsetTracker {
    cell: Rc<Cell<usize>>,
    id: CallbackId,
}

impl OffsetTracker {
    /// Current value of the tracked offset.
    pub fn get(&self) -> usize {
        self.cell.get()
    }

    /// Moves the tracked offset.
    pub fn set(&self, offset: usize) {
        self.cell.set(offset);
    }

    /// The callback registration behind this tracker, usable with
    /// [`Buffer::remove_callback`] to stop tracking.
    pub fn id(&self) -> CallbackId {
        self.id
    }
}

fn follow_offset(cell: &Cell<usize>, op: LogOp, offset: usize, size: usize) {
    let current = cell.get();
    match op {
        LogOp::Insert if current > offset => cell.set(current + size),
        LogOp::Delete if current > offset => {
            cell.set(if current >= offset + size {
                current - size
            } else {
                offset
            });
        }
        _ => {}
    }
}

/// A named editable byte sequence stored as a list of pages.
///
/// All mutations go through [`write`](Buffer::write),
/// [`insert`](Buffer::insert), [`delete`](Buffer::delete) and
/// [`insert_from`](Buffer::insert_from), which share a mandatory order of
/// effects: registered callbacks are notified first, then the save-log
/// record is appended, and only then are the bytes changed and the derived
/// caches invalidated. This lets `Delete`/`Write` records capture the bytes
/// about to disappear from the buffer itself.
pub struct Buffer {
    pub(crate) name: String,
    pub(crate) filename: Option<PathBuf>,
    pub(crate) flags: BufferFlags,
    pub(crate) pages: Vec<Page>,
    pub(crate) total_size: usize,
    /// MRU entry for offset lookup: `(page index, base offset)`.
    cache: Cell<Option<(usize, usize)>>,
    pub(crate) charset: &'static Charset,
    callbacks: Vec<(CallbackId, CallbackFn)>,
    next_callback: CallbackId,
    pub(crate) save_log: bool,
    pub(crate) log_buffer: Option<Box<Buffer>>,
    pub(crate) log_new_index: usize,
    /// 1 + offset of the undo cursor's record; 0 when no undo run is active.
    pub(crate) log_current: usize,
    pub(crate) log_count: usize,
    pub(crate) undoing: bool,
    pub(crate) modified: bool,
    mark: OffsetTracker,
    pub(crate) data_type: &'static dyn DataType,
}

impl Buffer {
    /// Creates an empty buffer.
    ///
    /// The buffer starts with the raw data type and the Latin-1 charset, and
    /// its mark already registered on the callback bus. Name uniqueness is
    /// the registry's concern, not this constructor's.
    pub fn new(name: impl Into<String>, flags: BufferFlags) -> Buffer {
        let mut buffer = Buffer {
            name: name.into(),
            filename: None,
            flags,
            pages: Vec::new(),
            total_size: 0,
            cache: Cell::new(None),
            charset: &CHARSET_LATIN1,
            callbacks: Vec::new(),
            next_callback: 0,
            save_log: flags.contains(BufferFlags::SAVE_LOG),
            log_buffer: None,
            log_new_index: 0,
            log_current: 0,
            log_count: 0,
            undoing: false,
            modified: false,
            mark: OffsetTracker {
                cell: Rc::new(Cell::new(0)),
                id: 0,
            },
            data_type: &RAW_DATA,
        };
        log::debug!("new buffer {:?} ({:?})", buffer.name, flags);
        let cell = Rc::clone(&buffer.mark.cell);
        buffer.mark.id =
            buffer.add_callback(move |_, op, offset, size| follow_offset(&cell, op, offset, size));
        buffer
    }

    /// The buffer's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file backing the buffer, if any.
    pub fn filename(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    /// Associates the buffer with a file and renames it to the basename.
    ///
    /// When the buffer lives in a registry, prefer
    /// [`BufferSet::set_filename`](crate::BufferSet::set_filename), which
    /// also keeps the name unique.
    pub fn set_filename(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(base) = path.file_name() {
            self.name = base.to_string_lossy().into_owned();
        }
        self.filename = Some(path.to_path_buf());
    }

    /// The buffer's flags.
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Replaces the buffer's flags.
    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags = flags;
    }

    /// Whether the buffer is flagged read-only.
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(BufferFlags::READ_ONLY)
    }

    /// Number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.total_size
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }

    /// Whether the buffer has been mutated since creation, the last save or
    /// the last [`log_reset`](Buffer::log_reset).
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Number of records currently held in the save log.
    pub fn log_count(&self) -> usize {
        self.log_count
    }

    /// The charset used for character navigation.
    pub fn charset(&self) -> &'static Charset {
        self.charset
    }

    /// Replaces the decoding charset.
    ///
    /// Cached per-page character and position facts were computed under the
    /// previous charset, so they are all invalidated.
    pub fn set_charset(&mut self, charset: &'static Charset) {
        self.charset = charset;
        for page in &mut self.pages {
            page.invalidate();
        }
    }

    /// Replaces the data-type plug used by load and save.
    pub fn set_data_type(&mut self, data_type: &'static dyn DataType) {
        self.data_type = data_type;
    }

    /// Registers `callback` on the bus and returns its removal token.
    ///
    /// On every mutation, callbacks run in registration order, before the
    /// bytes change, with the operation kind and its `(offset, size)`
    /// extent. A callback sees the buffer through a shared reference and so
    /// cannot mutate it.
    pub fn add_callback(
        &mut self,
        callback: impl FnMut(&Buffer, LogOp, usize, usize) + 'static,
    ) -> CallbackId {
        let id = self.next_callback;
        self.next_callback += 1;
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Unhooks a callback. Returns `false` when the token is unknown.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(cid, _)| *cid != id);
        self.callbacks.len() != before
    }

    /// Registers an offset follower and returns its handle.
    pub fn register_tracker(&mut self, initial: usize) -> OffsetTracker {
        let cell = Rc::new(Cell::new(initial));
        let follower = Rc::clone(&cell);
        let id =
            self.add_callback(move |_, op, offset, size| follow_offset(&follower, op, offset, size));
        OffsetTracker { cell, id }
    }

    /// The buffer's mark offset.
    pub fn mark(&self) -> usize {
        self.mark.get()
    }

    /// Moves the buffer's mark.
    pub fn set_mark(&mut self, offset: usize) {
        self.mark.set(offset);
    }

    fn notify(&mut self, op: LogOp, offset: usize, size: usize) {
        if self.callbacks.is_empty() {
            return;
        }
        // Callbacks receive a shared borrow of the buffer, so the list is
        // parked aside for the duration of the fan-out.
        let mut callbacks = mem::take(&mut self.callbacks);
        for (_, callback) in callbacks.iter_mut() {
            callback(self, op, offset, size);
        }
        self.callbacks = callbacks;
    }

    /// Fans out to callbacks and appends the save-log record; the first two
    /// steps of every mutation.
    pub(crate) fn record_edit(&mut self, op: LogOp, offset: usize, size: usize) {
        self.notify(op, offset, size);
        let was_modified = self.modified;
        self.modified = true;
        if !self.save_log {
            return;
        }
        undo::append_record(self, op, offset, size, was_modified);
        if !self.undoing {
            // a fresh edit breaks any undo run in progress
            self.log_current = 0;
        }
    }

    /// Locates the page containing `offset`.
    ///
    /// Returns the page index and the offset relative to the page start.
    /// The caller must ensure `offset` is below the sum of page sizes.
    pub(crate) fn find_page(&self, offset: usize) -> (usize, usize) {
        if let Some((index, base)) = self.cache.get() {
            if index < self.pages.len()
                && offset >= base
                && offset < base + self.pages[index].len()
            {
                return (index, offset - base);
            }
        }
        let mut rel = offset;
        let mut index = 0;
        while rel >= self.pages[index].len() {
            rel -= self.pages[index].len();
            index += 1;
        }
        self.cache.set(Some((index, offset - rel)));
        (index, rel)
    }

    /// Reads bytes starting at `offset` into `dst`.
    ///
    /// Returns how many bytes were read; this is only smaller than
    /// `dst.len()` when the requested span reaches past the end of the
    /// buffer. Reading has no observable side effects: no callbacks, no log
    /// record, no cache invalidation.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> usize {
        if offset >= self.total_size {
            return 0;
        }
        let total = dst.len().min(self.total_size - offset);
        let (mut index, mut off) = self.find_page(offset);
        let mut done = 0;
        while done < total {
            let page = &self.pages[index];
            let len = (page.len() - off).min(total - done);
            dst[done..done + len].copy_from_slice(&page.bytes()[off..off + len]);
            done += len;
            off = 0;
            index += 1;
        }
        total
    }

    /// Overwrites bytes at `offset` with `src`, extending the buffer when
    /// `src` reaches past the current end.
    ///
    /// The overlapped span is recorded as a `Write`; the appended remainder
    /// goes through [`insert`](Buffer::insert) and is recorded separately,
    /// so the save log stays replayable.
    pub fn write(&mut self, offset: usize, src: &[u8]) {
        let offset = offset.min(self.total_size);
        let overlap = src.len().min(self.total_size - offset);
        if overlap > 0 {
            self.record_edit(LogOp::Write, offset, overlap);
            let (mut index, mut off) = self.find_page(offset);
            let mut done = 0;
            while done < overlap {
                let page = &mut self.pages[index];
                let len = (page.len() - off).min(overlap - done);
                page.writable()[off..off + len].copy_from_slice(&src[done..done + len]);
                done += len;
                off = 0;
                index += 1;
            }
            self.cache.set(None);
        }
        if overlap < src.len() {
            self.insert(offset + overlap, &src[overlap..]);
        }
    }

    /// Inserts `src` before the byte at `offset` (at the end when `offset`
    /// equals the buffer size). Inserting nothing is a complete no-op.
    pub fn insert(&mut self, offset: usize, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        let offset = offset.min(self.total_size);
        self.record_edit(LogOp::Insert, offset, src.len());
        self.insert_lowlevel(offset, src);
    }

    /// Structural insertion below the notify/log steps.
    fn insert_lowlevel(&mut self, offset: usize, mut src: &[u8]) {
        self.total_size += src.len();

        let mut insert_index = 0;
        if offset > 0 {
            // look the previous byte up so that offset == page end lands in
            // that page rather than at the head of the next one
            let (index, off) = self.find_page(offset - 1);
            let off = off + 1;
            let page_len = self.pages[index].len();

            // how much fits into this page without exceeding the page limit,
            // and how much of its tail gets pushed out to make room
            let room = MAX_PAGE_SIZE.saturating_sub(off);
            let len = room.min(src.len());
            let overflow = (page_len + len).saturating_sub(MAX_PAGE_SIZE);
            if overflow > 0 {
                let tail = self.pages[index].bytes()[page_len - overflow..].to_vec();
                self.insert_at_page_head(index + 1, &tail);
            }
            if len > 0 {
                let data = self.pages[index].writable();
                data.truncate(page_len - overflow);
                data.splice(off..off, src[..len].iter().copied());
                src = &src[len..];
            }
            insert_index = index + 1;
        }
        if !src.is_empty() {
            self.insert_at_page_head(insert_index, src);
        }
        self.cache.set(None);
    }

    /// Pushes `src` in front of the page at `index`, filling it up to the
    /// page limit and materializing any remainder as new owned pages before
    /// it.
    fn insert_at_page_head(&mut self, index: usize, mut src: &[u8]) {
        if index < self.pages.len() {
            let page = &mut self.pages[index];
            let len = (MAX_PAGE_SIZE - page.len()).min(src.len());
            if len > 0 {
                let data = page.writable();
                data.splice(0..0, src[src.len() - len..].iter().copied());
                src = &src[..src.len() - len];
            }
        }
        if !src.is_empty() {
            let fresh: Vec<Page> = src.chunks(MAX_PAGE_SIZE).map(Page::with_bytes).collect();
            self.pages.splice(index..index, fresh);
        }
        self.cache.set(None);
    }

    /// Removes up to `count` bytes starting at `offset`. Deleting at or past
    /// the end is a no-op.
    pub fn delete(&mut self, offset: usize, count: usize) {
        if offset >= self.total_size || count == 0 {
            return;
        }
        let count = count.min(self.total_size - offset);
        self.record_edit(LogOp::Delete, offset, count);

        self.total_size -= count;
        let (mut index, mut off) = self.find_page(offset);
        let mut remaining = count;
        let mut drop_start = None;
        let mut dropped = 0;
        while remaining > 0 {
            let page_len = self.pages[index].len();
            let len = (page_len - off).min(remaining);
            if len == page_len {
                // whole page covered; slabs are released in one go below
                if drop_start.is_none() {
                    drop_start = Some(index);
                }
                dropped += 1;
                index += 1;
                off = 0;
            } else {
                let data = self.pages[index].writable();
                data.drain(off..off + len);
                if off >= data.len() {
                    index += 1;
                    off = 0;
                }
            }
            remaining -= len;
        }
        if let Some(start) = drop_start {
            self.pages.drain(start..start + dropped);
        }
        self.cache.set(None);
    }

    /// Copies `count` bytes from `src` starting at `src_offset` into this
    /// buffer before `offset`.
    ///
    /// Source pages wholly covered by the copy are not copied at all: their
    /// storage is shared between the two buffers and only copied out when
    /// one of them later writes into it. Partially covered boundary pages
    /// are byte-copied.
    pub fn insert_from(
        &mut self,
        offset: usize,
        src: &mut Buffer,
        src_offset: usize,
        count: usize,
    ) {
        if count == 0 || src_offset >= src.total_size {
            return;
        }
        let mut count = count.min(src.total_size - src_offset);
        let mut offset = offset.min(self.total_size);
        self.record_edit(LogOp::Insert, offset, count);

        // a partially covered leading source page is byte-copied
        let (mut src_index, src_off) = src.find_page(src_offset);
        if src_off > 0 {
            let page = &src.pages[src_index];
            let len = (page.len() - src_off).min(count);
            self.insert_lowlevel(offset, &page.bytes()[src_off..src_off + len]);
            offset += len;
            count -= len;
            src_index += 1;
        }
        if count == 0 {
            return;
        }

        // split the destination page at the insertion point
        let mut insert_index;
        if offset < self.total_size {
            let (index, off) = self.find_page(offset);
            if off > 0 {
                insert_index = index + 1;
                let tail = self.pages[index].bytes()[off..].to_vec();
                self.insert_at_page_head(insert_index, &tail);
                self.pages[index].writable().truncate(off);
            } else {
                insert_index = index;
            }
        } else {
            insert_index = self.pages.len();
        }
        self.total_size += count;

        // wholly covered source pages are inserted by reference
        let mut shared = Vec::new();
        while count > 0 && src.pages[src_index].len() <= count {
            let page = src.pages[src_index].share();
            count -= page.len();
            shared.push(page);
            src_index += 1;
        }
        let run = shared.len();
        self.pages.splice(insert_index..insert_index, shared);
        insert_index += run;

        // a partially covered trailing source page is byte-copied
        if count > 0 {
            let head = src.pages[src_index].bytes()[..count].to_vec();
            self.insert_at_page_head(insert_index, &head);
        }
        self.cache.set(None);
    }

    /// Appends bytes at the end of the buffer.
    pub fn append(&mut self, src: &[u8]) {
        self.insert(self.total_size, src);
    }

    /// Returns the whole contents as one vector. Meant for small buffers
    /// and diagnostics; large buffers should be streamed with
    /// [`read`](Buffer::read).
    pub fn contents(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.total_size];
        self.read(0, &mut out);
        out
    }

    /// Drops the contents and the undo history without recording anything,
    /// for when the backing data is about to be reloaded.
    pub fn invalidate_raw_data(&mut self) {
        self.save_log = false;
        self.delete(0, self.total_size);
        self.log_reset();
        self.save_log = self.flags.contains(BufferFlags::SAVE_LOG);
    }

    /// Releases everything the buffer holds: the data type is closed,
    /// callbacks are dropped, the contents are cleared with logging
    /// disabled and the log buffer is released.
    pub(crate) fn close(&mut self) {
        let data_type = self.data_type;
        data_type.close(self);
        self.callbacks.clear();
        self.save_log = false;
        self.delete(0, self.total_size);
        self.log_reset();
        log::debug!("freed buffer {:?}", self.name);
    }

    /// Installs a page list built elsewhere (the mmap load path).
    pub(crate) fn replace_pages(&mut self, pages: Vec<Page>, total_size: usize) {
        self.pages = pages;
        self.total_size = total_size;
        self.cache.set(None);
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("size", &self.total_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn filled(name: &str, content: &[u8]) -> Buffer {
        let mut buffer = Buffer::new(name, BufferFlags::empty());
        buffer.insert(0, content);
        buffer
    }

    fn page_sizes(buffer: &Buffer) -> Vec<usize> {
        buffer.pages.iter().map(|p| p.len()).collect()
    }

    #[test]
    fn insert_read_delete() {
        let mut buffer = Buffer::new("*s*", BufferFlags::SAVE_LOG);
        buffer.insert(0, b"Hello, World");
        assert_eq!(buffer.len(), 12);

        let mut out = [0u8; 5];
        assert_eq!(buffer.read(7, &mut out), 5);
        assert_eq!(&out, b"World");
        assert_eq!(buffer.get_pos(12), (0, 12));

        buffer.delete(5, 2);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.contents(), b"HelloWorld");
        assert_eq!(buffer.log_count(), 2);
    }

    #[test]
    fn read_short_returns() {
        let buffer = filled("b", b"abc");
        let mut out = [0u8; 8];
        assert_eq!(buffer.read(1, &mut out), 2);
        assert_eq!(&out[..2], b"bc");
        assert_eq!(buffer.read(3, &mut out), 0);
        assert_eq!(buffer.read(100, &mut out), 0);
    }

    #[test]
    fn empty_insert_is_a_noop() {
        let mut buffer = Buffer::new("b", BufferFlags::SAVE_LOG);
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        buffer.add_callback(move |_, _, _, _| seen.set(seen.get() + 1));

        buffer.insert(0, b"");
        buffer.insert(0, b"");

        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.log_count(), 0);
        assert_eq!(calls.get(), 0);
        assert!(!buffer.modified());
    }

    #[test]
    fn insert_spanning_pages() {
        let content: Vec<u8> = (0..3 * MAX_PAGE_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let buffer = filled("b", &content);

        assert_eq!(buffer.len(), content.len());
        assert_eq!(buffer.contents(), content);
        for size in page_sizes(&buffer) {
            assert!(size > 0 && size <= MAX_PAGE_SIZE);
        }
    }

    #[test]
    fn insert_in_page_middle() {
        let mut buffer = filled("b", b"0123456789");
        buffer.insert(4, b"abc");
        assert_eq!(buffer.contents(), b"0123abc456789");

        // a middle insert into a full page must push its tail onward
        let big: Vec<u8> = std::iter::repeat(b'x').take(MAX_PAGE_SIZE).collect();
        let mut buffer = filled("b", &big);
        buffer.insert(10, b"yy");
        assert_eq!(buffer.len(), MAX_PAGE_SIZE + 2);
        let contents = buffer.contents();
        assert_eq!(&contents[..10], &big[..10]);
        assert_eq!(&contents[10..12], b"yy");
        assert_eq!(&contents[12..], &big[10..]);
        for size in page_sizes(&buffer) {
            assert!(size > 0 && size <= MAX_PAGE_SIZE);
        }
    }

    #[test]
    fn insert_at_both_ends() {
        let mut buffer = filled("b", b"middle");
        buffer.insert(0, b"start ");
        buffer.insert(buffer.len(), b" end");
        assert_eq!(buffer.contents(), b"start middle end");
    }

    #[test]
    fn write_overwrites_and_extends() {
        let mut buffer = filled("b", b"abcdef");
        buffer.write(2, b"XY");
        assert_eq!(buffer.contents(), b"abXYef");
        assert_eq!(buffer.len(), 6);

        buffer.write(4, b"1234");
        assert_eq!(buffer.contents(), b"abXY1234");
        assert_eq!(buffer.len(), 8);

        // writing at the end behaves as an insert
        buffer.write(buffer.len(), b"!!");
        assert_eq!(buffer.contents(), b"abXY1234!!");
    }

    #[test]
    fn delete_across_pages() {
        let content: Vec<u8> = (0..3 * MAX_PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        let mut buffer = filled("b", &content);

        buffer.delete(100, 2 * MAX_PAGE_SIZE);
        assert_eq!(buffer.len(), MAX_PAGE_SIZE - 100);

        let mut expected = Vec::new();
        expected.extend_from_slice(&content[..100]);
        expected.extend_from_slice(&content[100 + 2 * MAX_PAGE_SIZE..]);
        assert_eq!(buffer.contents(), expected);
    }

    #[test]
    fn delete_past_end_is_a_noop() {
        let mut buffer = filled("b", b"abc");
        buffer.delete(3, 10);
        buffer.delete(100, 1);
        assert_eq!(buffer.contents(), b"abc");

        // a delete reaching past the end is clamped
        buffer.delete(1, 100);
        assert_eq!(buffer.contents(), b"a");
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn size_matches_page_sum() {
        let mut buffer = filled("b", &vec![b'a'; 2 * MAX_PAGE_SIZE + 17]);
        buffer.delete(5, MAX_PAGE_SIZE);
        buffer.insert(MAX_PAGE_SIZE / 2, b"wedge");
        buffer.write(buffer.len() - 2, b"grow past the end");
        assert_eq!(buffer.len(), page_sizes(&buffer).iter().sum::<usize>());
    }

    #[test]
    fn callbacks_run_in_registration_order_before_mutation() {
        let mut buffer = filled("b", b"abcdef");
        let trace: Rc<RefCell<Vec<(u32, LogOp, usize, usize, Vec<u8>)>>> =
            Rc::new(RefCell::new(Vec::new()));

        for tag in 0..2 {
            let trace = Rc::clone(&trace);
            buffer.add_callback(move |buffer, op, offset, size| {
                trace
                    .borrow_mut()
                    .push((tag, op, offset, size, buffer.contents()));
            });
        }

        buffer.delete(1, 2);

        let trace = trace.borrow();
        assert_eq!(trace.len(), 2);
        for (i, entry) in trace.iter().enumerate() {
            assert_eq!(entry.0, i as u32);
            assert_eq!(entry.1, LogOp::Delete);
            assert_eq!(entry.2, 1);
            assert_eq!(entry.3, 2);
            // the pre-image is still visible during the fan-out
            assert_eq!(entry.4, b"abcdef");
        }
    }

    #[test]
    fn removed_callback_stays_silent() {
        let mut buffer = filled("b", b"abc");
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let id = buffer.add_callback(move |_, _, _, _| seen.set(seen.get() + 1));

        buffer.insert(0, b"x");
        assert_eq!(calls.get(), 1);

        assert!(buffer.remove_callback(id));
        assert!(!buffer.remove_callback(id));
        buffer.insert(0, b"y");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn tracker_follows_edits() {
        let mut buffer = filled("b", b"0123456789");
        let tracker = buffer.register_tracker(5);

        buffer.insert(2, b"ab");
        assert_eq!(tracker.get(), 7);

        // inserting exactly at the tracked offset leaves it in place
        buffer.insert(7, b"c");
        assert_eq!(tracker.get(), 7);

        buffer.delete(0, 2);
        assert_eq!(tracker.get(), 5);

        // a delete spanning the tracked offset clamps it to the start
        buffer.delete(3, 6);
        assert_eq!(tracker.get(), 3);

        // writes do not move offsets
        buffer.write(0, b"zz");
        assert_eq!(tracker.get(), 3);
    }

    #[test]
    fn mark_follows_edits() {
        let mut buffer = filled("b", b"hello");
        buffer.set_mark(3);
        buffer.insert(0, b"__");
        assert_eq!(buffer.mark(), 5);
        buffer.delete(0, 2);
        assert_eq!(buffer.mark(), 3);
    }

    #[test]
    fn insert_from_shares_whole_pages() {
        let content: Vec<u8> = (0..3 * MAX_PAGE_SIZE).map(|i| (i % 253) as u8).collect();
        let mut src = filled("src", &content);
        let mut dst = Buffer::new("dst", BufferFlags::empty());

        dst.insert_from(0, &mut src, 0, 3 * MAX_PAGE_SIZE);

        assert_eq!(dst.len(), 3 * MAX_PAGE_SIZE);
        assert_eq!(dst.contents(), content);
        assert_eq!(src.contents(), content);
        assert_eq!(dst.pages.len(), 3);
        for i in 0..3 {
            assert!(dst.pages[i].shares_storage_with(&src.pages[i]));
        }

        // a write into one shared page copies exactly that page out
        dst.write(MAX_PAGE_SIZE + 5, b"!");
        assert!(dst.pages[0].shares_storage_with(&src.pages[0]));
        assert!(!dst.pages[1].shares_storage_with(&src.pages[1]));
        assert!(dst.pages[2].shares_storage_with(&src.pages[2]));
        assert_eq!(src.contents(), content);
    }

    #[test]
    fn insert_from_partial_spans() {
        let content: Vec<u8> = (0..2 * MAX_PAGE_SIZE).map(|i| (i % 249) as u8).collect();
        let mut src = filled("src", &content);
        let mut dst = filled("dst", b"0123456789");

        dst.insert_from(4, &mut src, 100, MAX_PAGE_SIZE);

        let mut expected = Vec::new();
        expected.extend_from_slice(b"0123");
        expected.extend_from_slice(&content[100..100 + MAX_PAGE_SIZE]);
        expected.extend_from_slice(b"456789");
        assert_eq!(dst.contents(), expected);
        assert_eq!(src.contents(), content);
    }

    #[test]
    fn set_charset_invalidates_caches() {
        use crate::charset::CHARSET_UTF8;

        let mut buffer = filled("b", b"a\xc3\xa9b");
        buffer.set_charset(&CHARSET_UTF8);
        let _ = buffer.char_offset_of(4);
        assert!(buffer.pages[0].valid_char);

        buffer.set_charset(&CHARSET_LATIN1);
        assert!(!buffer.pages[0].valid_char);
    }

    #[test]
    fn modified_tracking() {
        let mut buffer = Buffer::new("b", BufferFlags::empty());
        assert!(!buffer.modified());
        buffer.insert(0, b"x");
        assert!(buffer.modified());
    }
}
