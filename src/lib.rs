//! A paged text-buffer engine: the storage core of a small editor.
//!
//! In short, *pagebuf* keeps the bytes of a file under edit in an ordered
//! list of fixed-max-size pages and supports efficient insertion, deletion
//! and random access at any offset, on buffers of arbitrary size. Around
//! that core it provides the machinery an editor needs from its buffer
//! layer: a change-callback bus, a reversible save log driving undo,
//! charset-aware character stepping and line/column lookups, and a
//! directory of named buffers.
//!
//! # Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! pagebuf = "0.1"
//! ```
//!
//! Then start from [`Buffer`] (a single editable byte sequence) or
//! [`BufferSet`] (a directory of uniquely named buffers):
//!
//! ```
//! use pagebuf::{Buffer, BufferFlags};
//!
//! let mut buffer = Buffer::new("*scratch*", BufferFlags::SAVE_LOG);
//! buffer.insert(0, b"Hello, World");
//! buffer.delete(5, 2);
//! assert_eq!(buffer.contents(), b"HelloWorld");
//!
//! // every mutation was recorded, so it can be taken back
//! buffer.undo().unwrap();
//! assert_eq!(buffer.contents(), b"Hello, World");
//! ```
//!
//! Character-level navigation goes through the buffer's charset:
//!
//! ```
//! use pagebuf::{Buffer, BufferFlags, CHARSET_UTF8};
//!
//! let mut buffer = Buffer::new("text", BufferFlags::empty());
//! buffer.insert(0, "café au lait".as_bytes());
//! buffer.set_charset(&CHARSET_UTF8);
//!
//! assert_eq!(buffer.next_char(3), (0xe9, 5));
//! assert_eq!(buffer.get_pos(5), (0, 4));
//! ```
//!
//! # Pages and sharing
//!
//! A buffer's bytes live in pages of at most [`MAX_PAGE_SIZE`] bytes. A
//! page either owns its bytes or holds a shared read-only reference into
//! storage it does not own: a region of a memory-mapped file, or a slab
//! also referenced from another buffer after a cross-buffer insertion
//! ([`Buffer::insert_from`] moves whole pages by reference, never by
//! copy). Shared pages are copied out lazily, the first time someone
//! writes into them, so mapping a large file or feeding the undo log costs
//! no byte copies up front.
//!
//! # Change notification and undo
//!
//! Every mutation notifies the buffer's callbacks, in registration order,
//! before the bytes change; then the save log records enough to reverse
//! the mutation; only then do the bytes change. The save log lives in an
//! ordinary (system-flagged) sibling buffer and is bounded: once
//! [`LOG_MAX`] records accumulate, the oldest is evicted per append.
//! [`Buffer::undo`] replays records backwards, one per call.
//!
//! # Concurrency
//!
//! The engine is deliberately single-threaded: a [`Buffer`] is not `Send`,
//! and nothing inside blocks except file I/O during explicit load and
//! save. Callbacks run synchronously and observe the buffer through a
//! shared reference, so a callback can never mutate the buffer it is told
//! about.
//!
//! # Errors
//!
//! Byte-level operations are total: reads past the end short-return,
//! deletes past the end are no-ops, inserts clamp their offset to the
//! buffer end. Only the file I/O surface ([`Buffer::load_file`],
//! [`Buffer::save`]) and [`Buffer::undo`] report [`Error`]s.
//!
//! # Panics
//!
//! Out-of-contract offsets never panic. Internal invariants are guarded by
//! debug assertions only.

#![doc(html_root_url = "https://docs.rs/pagebuf/0.1.0")]
#![deny(missing_docs)]

mod buffer;
mod charset;
mod data;
mod error;
mod page;
mod position;
mod registry;
mod undo;

pub use buffer::{Buffer, BufferFlags, CallbackId, LogOp, OffsetTracker};
pub use charset::{
    detect_charset, find_charset, register_charset, utf8_decode, utf8_encode, Charset, DecodeFn,
    EncodeFn, CHARSET_ASCII, CHARSET_LATIN1, CHARSET_UTF8, ESCAPE_CHAR, INVALID_CHAR,
    MAX_CHAR_BYTES,
};
pub use data::{DataType, RawData, IOBUF_SIZE, MIN_MMAP_SIZE, RAW_DATA};
pub use error::Error;
pub use page::MAX_PAGE_SIZE;
pub use registry::BufferSet;
pub use undo::LOG_MAX;
