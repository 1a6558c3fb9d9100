use std::fmt;

const COLUMNS: usize = 16;

/// Write a hexdump of the provided byte slice: sixteen bytes per row, each
/// row prefixed by its offset and followed by the printable ASCII
/// characters.
pub fn hexdump(f: &mut fmt::Formatter, prefix: &str, buffer: &[u8]) -> fmt::Result {
    if buffer.is_empty() {
        // For a zero-length buffer, at least print an offset instead of
        // nothing.
        return write!(f, "{}{:04x}: ", prefix, 0);
    }
    for (row_index, row) in buffer.chunks(COLUMNS).enumerate() {
        if row_index > 0 {
            writeln!(f)?;
        }
        write!(f, "{}{:04x}: ", prefix, row_index * COLUMNS)?;
        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in row.len()..COLUMNS {
            f.write_str("   ")?;
        }
        for &b in row {
            let c = match b {
                0x20..=0x7E => b as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

pub struct Hex<'a>(pub &'a [u8]);

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, "", self.0)
    }
}

pub fn hex(bytes: &[u8]) -> Hex<'_> {
    Hex(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]).to_string(), "0000: ");
        assert_eq!(
            hex(b"AB\x00").to_string(),
            format!("0000: 41 42 00 {}AB.", "   ".repeat(13))
        );
        let rows = hex(&[0x20u8; 20]).to_string();
        let rows = rows.lines().collect::<Vec<_>>();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with("0010: 20 20 20 20 "));
    }
}
