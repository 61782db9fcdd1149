use crate::error::{AduParseError, InternalError};

/// custom read-only cursor over a byte slice
pub(crate) struct ReadCursor<'a> {
    src: &'a [u8],
}

/// custom write cursor over a mutable byte slice
pub(crate) struct WriteCursor<'a> {
    dest: &'a mut [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub(crate) fn new(src: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { src }
    }

    pub(crate) fn len(&self) -> usize {
        self.src.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub(crate) fn expect_empty(&self) -> Result<(), AduParseError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AduParseError::TrailingBytes(self.len()))
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, AduParseError> {
        match self.src.split_first() {
            Some((first, rest)) => {
                self.src = rest;
                Ok(*first)
            }
            None => Err(AduParseError::InsufficientBytes),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, AduParseError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok((high as u16) << 8 | (low as u16))
    }
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(dest: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { dest, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.dest.len() - self.pos
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.dest[..self.pos]
    }

    pub(crate) fn seek_from_current(&mut self, count: usize) -> Result<(), InternalError> {
        if self.remaining() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos += count;
        Ok(())
    }

    pub(crate) fn seek_from_start(&mut self, count: usize) -> Result<(), InternalError> {
        if self.dest.len() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos = count;
        Ok(())
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<(), InternalError> {
        match self.dest.get_mut(self.pos) {
            Some(x) => {
                *x = value;
                self.pos += 1;
                Ok(())
            }
            None => Err(InternalError::InsufficientWriteSpace(1, 0)),
        }
    }

    pub(crate) fn write_u16_be(&mut self, value: u16) -> Result<(), InternalError> {
        if self.remaining() < 2 {
            // don't write any bytes if there isn't space for the whole thing
            return Err(InternalError::InsufficientWriteSpace(2, self.remaining()));
        }
        self.write_u8(((value & 0xFF00) >> 8) as u8)?;
        self.write_u8((value & 0x00FF) as u8)
    }

    pub(crate) fn write_u16_le(&mut self, value: u16) -> Result<(), InternalError> {
        if self.remaining() < 2 {
            return Err(InternalError::InsufficientWriteSpace(2, self.remaining()));
        }
        self.write_u8((value & 0x00FF) as u8)?;
        self.write_u8(((value & 0xFF00) >> 8) as u8)
    }
}
