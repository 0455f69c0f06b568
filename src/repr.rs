//! Printable renderings of the raw bytes returned by a single read.

use std::fmt::Write;

/// How each read is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Byte-string literal, `b'\x1b[A'`.
    #[default]
    Repr,
    /// Lowercase hex pairs, `1b 5b 41`.
    Hex,
    /// One `0b` group per byte, `0b00011011`.
    Binary,
}

impl Format {
    pub fn render(self, bytes: &[u8]) -> String {
        match self {
            Format::Repr => repr(bytes),
            Format::Hex => hex(bytes),
            Format::Binary => binary(bytes),
        }
    }
}

/// Renders `bytes` as a byte-string literal.
///
/// Printable ASCII is kept as is, `\t` `\n` `\r` use their short escapes and
/// every other byte becomes `\xNN`. The literal is quoted with `'` unless the
/// bytes hold a `'` and no `"`, in which case `"` avoids an escape.
pub fn repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };

    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            _ if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out.push(quote as char);
    out
}

pub fn hex(bytes: &[u8]) -> String {
    join(bytes, |out, b| write!(out, "{:02x}", b))
}

pub fn binary(bytes: &[u8]) -> String {
    join(bytes, |out, b| write!(out, "{:#010b}", b))
}

fn join(bytes: &[u8], mut each: impl FnMut(&mut String, u8) -> std::fmt::Result) -> String {
    let mut out = String::new();
    for (i, &b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = each(&mut out, b);
    }
    out
}
