//! Charset descriptors and the byte-to-codepoint machinery.
//!
//! A charset is a 256-entry byte table plus an optional multi-byte decoder.
//! Table entries are codepoints directly, except for the [`ESCAPE_CHAR`]
//! sentinel which marks a byte as the lead of a multi-byte sequence that the
//! decoder function must resolve. Fixed-width 8-bit charsets have no decoder
//! and their table never contains the sentinel.

use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Table sentinel marking a byte as a multi-byte lead.
pub const ESCAPE_CHAR: u16 = 0xffff;

/// Codepoint substituted for undecodable input.
pub const INVALID_CHAR: u32 = 0xfffd;

/// The longest encoded form of a single codepoint, in bytes.
pub const MAX_CHAR_BYTES: usize = 6;

const MIN_CODE: [u32; 7] = [0, 0, 0x80, 0x800, 0x10000, 0x0020_0000, 0x0400_0000];

const FIRST_CODE_MASK: [u8; 7] = [0, 0, 0x1f, 0xf, 0x7, 0x3, 0x1];

const fn identity_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u16;
        i += 1;
    }
    table
}

const fn utf8_table() -> [u16; 256] {
    let mut table = [INVALID_CHAR as u16; 256];
    let mut i = 0;
    while i < 0x80 {
        table[i] = i as u16;
        i += 1;
    }
    let mut i = 0xc0;
    while i < 0xfe {
        table[i] = ESCAPE_CHAR;
        i += 1;
    }
    table
}

const fn utf8_length_table() -> [u8; 256] {
    let mut table = [1u8; 256];
    let mut i = 0xc0;
    let mut l = 2;
    while l <= 6 {
        let mut n = FIRST_CODE_MASK[l] as usize + 1;
        while n > 0 {
            table[i] = l as u8;
            i += 1;
            n -= 1;
        }
        l += 1;
    }
    table
}

static TABLE_IDENTITY: [u16; 256] = identity_table();
static TABLE_UTF8: [u16; 256] = utf8_table();

/// Encoded length implied by a UTF-8 lead byte (1 for anything else).
pub(crate) static UTF8_LENGTH: [u8; 256] = utf8_length_table();

/// Multi-byte decoder: consumes one encoded codepoint from the front of the
/// cursor and advances it.
pub type DecodeFn = fn(&mut &[u8]) -> u32;

/// Encoder: appends the encoding of a codepoint, or returns `false` when the
/// charset cannot represent it.
pub type EncodeFn = fn(&mut Vec<u8>, u32) -> bool;

/// A byte-to-codepoint decoding capability.
///
/// The engine ships Latin-1 (the default), ASCII and UTF-8; additional
/// charsets can be registered with [`register_charset`] and looked up by name
/// or alias with [`find_charset`].
pub struct Charset {
    /// Canonical name.
    pub name: &'static str,
    /// Alternative names accepted by [`find_charset`].
    pub aliases: &'static [&'static str],
    /// Byte-to-codepoint table; [`ESCAPE_CHAR`] entries mark multi-byte
    /// leads that `decode` must resolve.
    pub table: &'static [u16; 256],
    /// Multi-byte decoder; `None` for fixed-width 8-bit charsets.
    pub decode: Option<DecodeFn>,
    /// Codepoint encoder.
    pub encode: EncodeFn,
}

impl Charset {
    /// Whether every codepoint is a single byte.
    pub fn is_8bit(&self) -> bool {
        self.decode.is_none()
    }

    /// Appends the encoded form of `c` to `out`.
    ///
    /// Returns `false` without touching `out` when the charset cannot
    /// represent `c`.
    pub fn encode(&self, out: &mut Vec<u8>, c: u32) -> bool {
        (self.encode)(out, c)
    }

    /// Appends the encoded form of `c` to `out`, substituting `'?'` when the
    /// charset cannot represent it.
    pub fn encode_lossy(&self, out: &mut Vec<u8>, c: u32) {
        if !self.encode(out, c) {
            out.push(b'?');
        }
    }
}

impl std::fmt::Debug for Charset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Charset({})", self.name)
    }
}

fn encode_latin1(out: &mut Vec<u8>, c: u32) -> bool {
    if c <= 0xff {
        out.push(c as u8);
        true
    } else {
        false
    }
}

fn encode_ascii(out: &mut Vec<u8>, c: u32) -> bool {
    if c <= 0x7f {
        out.push(c as u8);
        true
    } else {
        false
    }
}

fn encode_utf8_charset(out: &mut Vec<u8>, c: u32) -> bool {
    utf8_encode(out, c);
    true
}

/// ISO 8859-1, the default charset of new buffers.
pub static CHARSET_LATIN1: Charset = Charset {
    name: "8859-1",
    aliases: &["ISO-8859-1", "iso-ir-100", "latin1", "l1", "819"],
    table: &TABLE_IDENTITY,
    decode: None,
    encode: encode_latin1,
};

/// Plain 7-bit ASCII.
pub static CHARSET_ASCII: Charset = Charset {
    name: "7bit",
    aliases: &["us-ascii", "ascii", "7-bit", "iso-ir-6", "ANSI_X3.4", "646"],
    table: &TABLE_IDENTITY,
    decode: None,
    encode: encode_ascii,
};

/// UTF-8 with strict decoding (non-canonical sequences are rejected).
pub static CHARSET_UTF8: Charset = Charset {
    name: "utf-8",
    aliases: &["utf8"],
    table: &TABLE_UTF8,
    decode: Some(utf8_decode),
    encode: encode_utf8_charset,
};

static CHARSETS: Lazy<Mutex<Vec<&'static Charset>>> =
    Lazy::new(|| Mutex::new(vec![&CHARSET_LATIN1, &CHARSET_UTF8, &CHARSET_ASCII]));

/// Adds a charset to the process-wide registry.
pub fn register_charset(charset: &'static Charset) {
    CHARSETS.lock().unwrap().push(charset);
}

/// Looks a charset up by name or alias, case-insensitively.
pub fn find_charset(name: &str) -> Option<&'static Charset> {
    let charsets = CHARSETS.lock().unwrap();
    charsets
        .iter()
        .find(|cs| {
            cs.name.eq_ignore_ascii_case(name)
                || cs.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
        })
        .copied()
}

/// Guesses the charset of raw content. Only UTF-8 is actually detected;
/// anything else comes back as Latin-1.
pub fn detect_charset(buf: &[u8]) -> &'static Charset {
    let mut has_utf8 = false;
    let mut i = 0;
    while i < buf.len() {
        let c = buf[i];
        i += 1;
        if (0x80..0xc0).contains(&c) || c >= 0xfe {
            has_utf8 = false;
            break;
        }
        let mut l = UTF8_LENGTH[c as usize];
        let mut valid = true;
        while l > 1 {
            has_utf8 = true;
            if i >= buf.len() {
                valid = false;
                break;
            }
            let c = buf[i];
            i += 1;
            if !(0x80..0xc0).contains(&c) {
                valid = false;
                break;
            }
            l -= 1;
        }
        if !valid {
            has_utf8 = false;
            break;
        }
    }
    if has_utf8 {
        &CHARSET_UTF8
    } else {
        &CHARSET_LATIN1
    }
}

/// Decodes one codepoint from the front of `*cursor`, advancing it past the
/// consumed bytes.
///
/// Decoding is strict: overlong forms, surrogates, `U+FFFE`/`U+FFFF` and
/// broken continuation bytes all yield [`INVALID_CHAR`]. The cursor must not
/// be empty.
pub fn utf8_decode(cursor: &mut &[u8]) -> u32 {
    let bytes = *cursor;
    let c = bytes[0] as u32;
    if c < 128 {
        *cursor = &bytes[1..];
        return c;
    }

    let l = UTF8_LENGTH[c as usize] as usize;
    if l == 1 {
        // continuation or invalid byte in lead position
        *cursor = &bytes[1..];
        return INVALID_CHAR;
    }

    let mut code = c & FIRST_CODE_MASK[l] as u32;
    let mut i = 1;
    while i < l {
        if i >= bytes.len() {
            *cursor = &bytes[i..];
            return INVALID_CHAR;
        }
        let c1 = bytes[i] as u32;
        if !(0x80..0xc0).contains(&c1) {
            *cursor = &bytes[i..];
            return INVALID_CHAR;
        }
        code = (code << 6) | (c1 & 0x3f);
        i += 1;
    }
    *cursor = &bytes[l..];

    if code < MIN_CODE[l] {
        return INVALID_CHAR;
    }
    // surrogate pairs and special codes are not characters
    if (0xd800..=0xdfff).contains(&code) || code == 0xfffe || code == 0xffff {
        return INVALID_CHAR;
    }
    code
}

/// Appends the UTF-8 encoding of `c` to `out`. Codepoints up to 31 bits are
/// representable, so this never fails.
pub fn utf8_encode(out: &mut Vec<u8>, c: u32) {
    if c < 0x80 {
        out.push(c as u8);
        return;
    }
    if c < 0x800 {
        out.push((c >> 6) as u8 | 0xc0);
    } else {
        if c < 0x10000 {
            out.push((c >> 12) as u8 | 0xe0);
        } else {
            if c < 0x0020_0000 {
                out.push((c >> 18) as u8 | 0xf0);
            } else {
                if c < 0x0400_0000 {
                    out.push((c >> 24) as u8 | 0xf8);
                } else {
                    out.push((c >> 30) as u8 | 0xfc);
                    out.push(((c >> 24) & 0x3f) as u8 | 0x80);
                }
                out.push(((c >> 18) & 0x3f) as u8 | 0x80);
            }
            out.push(((c >> 12) & 0x3f) as u8 | 0x80);
        }
        out.push(((c >> 6) & 0x3f) as u8 | 0x80);
    }
    out.push((c & 0x3f) as u8 | 0x80);
}
