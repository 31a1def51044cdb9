use std::sync::Arc;

use memmap2::Mmap;

/// The maximum number of bytes a single page holds.
pub const MAX_PAGE_SIZE: usize = 4096;

/// Storage backing one or more shared pages.
///
/// A heap backing is created when an owned page is lent to another buffer
/// (cross-buffer insertion, save-log payloads); a map backing covers a whole
/// memory-mapped file sliced into pages. The `Arc` refcount decides when the
/// storage is released, whichever buffer drops its last page first.
pub(crate) enum Backing {
    Heap(Box<[u8]>),
    Map(Mmap),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Heap(data) => data,
            Backing::Map(map) => map,
        }
    }
}

enum Slab {
    /// Heap slab private to this page, freely mutable.
    Owned(Vec<u8>),
    /// Read-only window into storage possibly referenced by other pages.
    /// Any mutating access must copy out first.
    Shared {
        backing: Arc<Backing>,
        start: usize,
        len: usize,
    },
}

/// A contiguous byte slab, one element of a buffer's ordered page list.
///
/// Besides the bytes, a page caches derived facts for the line/column and
/// char-offset indexes. The caches are meaningful only while the matching
/// validity flag is set; any mutation of the page clears both.
pub(crate) struct Page {
    data: Slab,
    /// `nb_lines` and `col` are meaningful.
    pub(crate) valid_pos: bool,
    /// `nb_chars` is meaningful.
    pub(crate) valid_char: bool,
    /// Count of `'\n'` bytes in the page.
    pub(crate) nb_lines: usize,
    /// Codepoints between the last `'\n'` (or the page start) and the end.
    pub(crate) col: usize,
    /// Count of codepoints in the page.
    pub(crate) nb_chars: usize,
}

impl Page {
    /// Creates an owned page holding a copy of `bytes`.
    pub(crate) fn with_bytes(bytes: &[u8]) -> Self {
        debug_assert!(!bytes.is_empty() && bytes.len() <= MAX_PAGE_SIZE);
        Self::from_slab(Slab::Owned(bytes.to_vec()))
    }

    /// Creates a shared read-only page over `backing[start..start + len]`.
    pub(crate) fn from_shared(backing: Arc<Backing>, start: usize, len: usize) -> Self {
        debug_assert!(len > 0 && len <= MAX_PAGE_SIZE);
        debug_assert!(start + len <= backing.bytes().len());
        Self::from_slab(Slab::Shared {
            backing,
            start,
            len,
        })
    }

    fn from_slab(data: Slab) -> Self {
        Self {
            data,
            valid_pos: false,
            valid_char: false,
            nb_lines: 0,
            col: 0,
            nb_chars: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.data {
            Slab::Owned(data) => data.len(),
            Slab::Shared { len, .. } => *len,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match &self.data {
            Slab::Owned(data) => data,
            Slab::Shared {
                backing,
                start,
                len,
            } => &backing.bytes()[*start..*start + *len],
        }
    }

    /// Prepares the page for a byte-level write and returns its storage.
    ///
    /// A shared page is copied out into a fresh owned slab first; the derived
    /// fact caches are invalidated either way.
    pub(crate) fn writable(&mut self) -> &mut Vec<u8> {
        if let Slab::Shared { .. } = self.data {
            self.data = Slab::Owned(self.bytes().to_vec());
        }
        self.valid_pos = false;
        self.valid_char = false;
        match &mut self.data {
            Slab::Owned(data) => data,
            Slab::Shared { .. } => unreachable!(),
        }
    }

    /// Clears the derived-fact caches without touching the bytes.
    pub(crate) fn invalidate(&mut self) {
        self.valid_pos = false;
        self.valid_char = false;
    }

    /// Returns a page referencing the same storage as this one.
    ///
    /// An owned slab is first moved behind an `Arc`, turning this page into a
    /// shared read-only one; the bytes themselves are not copied. The clone
    /// starts with invalid caches.
    pub(crate) fn share(&mut self) -> Page {
        if let Slab::Owned(data) = &mut self.data {
            let boxed = std::mem::replace(data, Vec::new()).into_boxed_slice();
            let len = boxed.len();
            self.data = Slab::Shared {
                backing: Arc::new(Backing::Heap(boxed)),
                start: 0,
                len,
            };
        }
        match &self.data {
            Slab::Shared {
                backing,
                start,
                len,
            } => Page::from_shared(Arc::clone(backing), *start, *len),
            Slab::Owned(_) => unreachable!(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_shared(&self) -> bool {
        matches!(self.data, Slab::Shared { .. })
    }

    #[cfg(test)]
    pub(crate) fn shares_storage_with(&self, other: &Page) -> bool {
        match (&self.data, &other.data) {
            (Slab::Shared { backing: a, .. }, Slab::Shared { backing: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_out_on_write() {
        let mut owned = Page::with_bytes(b"abcdef");
        let shared = owned.share();

        assert!(owned.is_shared());
        assert!(shared.is_shared());
        assert!(owned.shares_storage_with(&shared));
        assert_eq!(owned.bytes(), b"abcdef");
        assert_eq!(shared.bytes(), b"abcdef");

        let mut shared = shared;
        shared.writable()[0] = b'x';

        assert!(!shared.is_shared());
        assert!(!owned.shares_storage_with(&shared));
        assert_eq!(shared.bytes(), b"xbcdef");
        assert_eq!(owned.bytes(), b"abcdef");
    }

    #[test]
    fn share_of_shared_reuses_backing() {
        let mut page = Page::with_bytes(b"abc");
        let first = page.share();
        let mut page = page;
        let second = page.share();

        assert!(first.shares_storage_with(&second));
    }

    #[test]
    fn writable_invalidates_caches() {
        let mut page = Page::with_bytes(b"one\ntwo");
        page.valid_pos = true;
        page.valid_char = true;

        page.writable();

        assert!(!page.valid_pos);
        assert!(!page.valid_char);
    }
}
