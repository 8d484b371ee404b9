use std::fmt;

const ROW: usize = 16;

/// Offset, hex and printable-ASCII columns, sixteen bytes per row. Used when
/// tracing datagrams that could not be decoded.
pub struct HexDump<'a>(&'a [u8]);

impl<'a> HexDump<'a>
{
    pub fn new<T>(data: &'a T) -> HexDump<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        HexDump(data.as_ref())
    }
}

impl fmt::Display for HexDump<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for (row, chunk) in self.0.chunks(ROW).enumerate()
        {
            if row > 0
            {
                writeln!(f)?;
            }

            write!(f, "{:04x} ", row * ROW)?;

            for byte in chunk
            {
                write!(f, " {:02x}", byte)?;
            }

            for _ in chunk.len()..ROW
            {
                write!(f, "   ")?;
            }

            write!(f, "  |")?;
            for byte in chunk
            {
                let c = if byte.is_ascii_graphic() || *byte == b' ' { *byte as char } else { '.' };
                write!(f, "{}", c)?;
            }
            write!(f, "|")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_empty()
    {
        assert_eq!(format!("{}", HexDump::new(&[])), "");
    }

    #[test]
    fn test_short_row_is_padded()
    {
        let expected = format!("0000  5f 61 00{}  |_a.|", " ".repeat(13 * 3));
        assert_eq!(format!("{}", HexDump::new(b"_a\0")), expected);
    }

    #[test]
    fn test_two_rows()
    {
        let data: Vec<u8> = (0x41..0x52).collect();
        let dump = format!("{}", HexDump::new(&data));
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0000  41 42 43 44 45 46 47 48 49 4a 4b 4c 4d 4e 4f 50  |ABCDEFGHIJKLMNOP|");
        assert!(lines[1].starts_with("0010  51 "));
        assert!(lines[1].ends_with("|Q|"));
    }
}
