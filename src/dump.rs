//! Canonical hex+ASCII rendering, 16 bytes per line:
//!
//! ```text
//! 00000000: 48 65 6C 6C 6F 20 57 6F  72 6C 64 0A 00 01 02 03  Hello World.....
//! ```

use std::fmt::Write as _;

const BYTES_PER_LINE: usize = 16;
const HALF: usize = BYTES_PER_LINE / 2;

/// Render `bytes` as dump lines joined by `\n` (no trailing newline). Empty input
/// renders as an empty string.
pub fn hexdump(bytes: &[u8]) -> String {
    bytes
        .chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, chunk)| dump_line(i * BYTES_PER_LINE, chunk))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line: address, two groups of up to eight bytes, padding so the ASCII
/// column always starts at the same offset, then the ASCII column.
pub fn dump_line(address: usize, chunk: &[u8]) -> String {
    let mut line = format!("{:08X}: ", address);
    for (i, b) in chunk.iter().enumerate() {
        if i == HALF {
            line.push(' ');
        }
        if i > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{:02X}", b);
    }
    let mut pad = 2 + 3 * (BYTES_PER_LINE - chunk.len());
    if chunk.len() <= HALF {
        pad += 1;
    }
    line.extend(std::iter::repeat(' ').take(pad));
    line.extend(chunk.iter().map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' }));
    line
}
