pub(crate) mod buffer;
pub(crate) mod cursor;
pub(crate) mod frame;
pub(crate) mod function;
pub(crate) mod traits;

use std::fmt::Write;

const BYTES_PER_DECODE_LINE: usize = 18;

/// Display adapter that hex-dumps a byte slice, wrapping every 18 bytes
pub(crate) struct Bytes<'a>(pub(crate) &'a [u8]);

impl std::fmt::Display for Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for chunk in self.0.chunks(BYTES_PER_DECODE_LINE) {
            writeln!(f)?;
            let mut first = true;
            for byte in chunk {
                if !first {
                    f.write_char(' ')?;
                }
                first = false;
                write!(f, "{byte:02X?}")?;
            }
        }
        Ok(())
    }
}
