//! Byte-pattern DSL for file content tests.
//!
//! [`expand`] turns a compact textual spec into bytes, so corruption and
//! golden tests can describe file contents readably:
//!
//! - `2d 84 3b`: hex bytes; `_` may join pairs (`80_00`)
//! - `'hello`: literal ASCII text
//! - `#300`: unsigned LEB128 varint of a decimal value
//! - `FF*100`: repeat an element
//! - `1..` / `1...`: pad the element with zero bytes to 4 / 8 bytes
//! - `elem/comment`: trailing commentary, ignored
//!
//! [`hex_dump`] renders bytes for failure messages, optionally
//! highlighting the first differing offset.

/// Expands a list of byte-pattern specs into a byte vector.
///
/// # Panics
///
/// Panics on malformed specs; this is test-only code.
#[must_use]
pub fn expand(specs: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for spec in specs {
        for elem in spec.split_whitespace() {
            expand_element(&mut out, elem);
        }
    }
    out
}

fn expand_element(out: &mut Vec<u8>, elem: &str) {
    let base = elem.split('/').next().unwrap_or("");
    if base.is_empty() {
        return;
    }

    let (base, rep) = match base.split_once('*') {
        Some((base, rep)) => (
            base,
            rep.parse::<usize>()
                .unwrap_or_else(|_| panic!("invalid repeat count in element {elem:?}")),
        ),
        None => (base, 1),
    };

    let (base, right, pad_to) = if let Some((base, right)) = base.split_once("...") {
        (base, right, Some(8))
    } else if let Some((base, right)) = base.split_once("..") {
        (base, right, Some(4))
    } else {
        (base, "", None)
    };

    let base_bytes = decode_atom(base, elem);
    let right_bytes = decode_atom(right, elem);

    for _ in 0..rep {
        out.extend_from_slice(&base_bytes);
        if let Some(width) = pad_to {
            let have = base_bytes.len() + right_bytes.len();
            for _ in have..width {
                out.push(0);
            }
        }
        out.extend_from_slice(&right_bytes);
    }
}

fn decode_atom(atom: &str, elem: &str) -> Vec<u8> {
    if let Some(decimal) = atom.strip_prefix('#') {
        let value: u64 = decimal
            .parse()
            .unwrap_or_else(|_| panic!("invalid varint value in element {elem:?}"));
        return uvarint(value);
    }
    if let Some(text) = atom.strip_prefix('\'') {
        return text.as_bytes().to_vec();
    }

    let mut out = Vec::new();
    let mut pending: Option<u8> = None;
    for c in atom.chars() {
        let half = match c {
            '_' | ' ' => {
                if let Some(v) = pending.take() {
                    out.push(v);
                }
                continue;
            }
            '0'..='9' => c as u8 - b'0',
            'a'..='f' => c as u8 - b'a' + 10,
            'A'..='F' => c as u8 - b'A' + 10,
            _ => panic!("invalid char {c:?} in element {elem:?}"),
        };
        match pending.take() {
            None => pending = Some(half),
            Some(high) => out.push(high << 4 | half),
        }
    }
    if let Some(v) = pending {
        out.push(v);
    }
    out
}

fn uvarint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
    out
}

/// Renders bytes as a hex dump, marking `highlight` with a `>`.
///
/// Pass `usize::MAX` (or any out-of-range offset) to highlight nothing.
#[must_use]
pub fn hex_dump(data: &[u8], highlight: usize) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let n = data.len();
    let mut offset = 0;
    loop {
        let _ = write!(out, "{offset:08x}");
        if offset >= n {
            out.push('\n');
            break;
        }
        for i in 0..8 {
            if offset + i >= n {
                out.push_str("   ");
            } else {
                out.push(if offset + i == highlight { '>' } else { ' ' });
                let _ = write!(out, "{:02x}", data[offset + i]);
            }
        }
        out.push_str("  |");
        for i in 0..8 {
            if offset + i < n {
                let v = data[offset + i];
                out.push(if (32..=126).contains(&v) {
                    v as char
                } else {
                    '.'
                });
            }
        }
        out.push_str("|\n");
        offset += 8;
        if offset >= n {
            break;
        }
    }
    out
}

/// Asserts byte equality with a hex-dump diff on failure.
///
/// # Panics
///
/// Panics when the slices differ.
pub fn assert_bytes_eq(actual: &[u8], expected: &[u8]) {
    if actual == expected {
        return;
    }
    let offset = actual
        .iter()
        .zip(expected.iter())
        .position(|(a, e)| a != e)
        .unwrap_or_else(|| actual.len().min(expected.len()));
    panic!(
        "bytes differ at offset 0x{offset:x} ({offset})\ngot:\n{}\nwanted:\n{}",
        hex_dump(actual, offset),
        hex_dump(expected, offset),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_hex() {
        assert_eq!(expand(&["2d 84 3b"]), vec![0x2d, 0x84, 0x3b]);
        assert_eq!(expand(&["80_00"]), vec![0x80, 0x00]);
    }

    #[test]
    fn expands_text_and_varints() {
        assert_eq!(expand(&["'hi"]), b"hi");
        assert_eq!(expand(&["#5"]), vec![5]);
        assert_eq!(expand(&["#300"]), vec![0xAC, 0x02]);
    }

    #[test]
    fn expands_repeats_and_padding() {
        assert_eq!(expand(&["0*4"]), vec![0, 0, 0, 0]);
        assert_eq!(expand(&["1..."]), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(expand(&["1.."]), vec![1, 0, 0, 0]);
        assert_eq!(expand(&["0...*2"]), vec![0; 16]);
    }

    #[test]
    fn ignores_comments() {
        assert_eq!(expand(&["5/five 6/six"]), vec![5, 6]);
    }

    #[test]
    fn combined_record_spec() {
        // A record with a 5-byte payload at delta 0: #10 #0 'hello.
        assert_eq!(
            expand(&["#10 #0 'hello"]),
            vec![10, 0, b'h', b'e', b'l', b'l', b'o']
        );
    }

    #[test]
    fn dump_is_stable() {
        let dump = hex_dump(b"hello!!!", usize::MAX);
        assert!(dump.starts_with("00000000"));
        assert!(dump.contains("|hello!!!|"));
    }
}
