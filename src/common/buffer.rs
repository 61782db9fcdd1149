use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::InternalError;

/// Sliding window over bytes received from an async stream
pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&[u8], InternalError> {
        if self.len() < count {
            return Err(InternalError::InsufficientBytesForRead(count, self.len()));
        }

        match self.buffer.get(self.begin..(self.begin + count)) {
            Some(ret) => {
                self.begin += count;
                Ok(ret)
            }
            None => Err(InternalError::InsufficientBytesForRead(count, self.len())),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InternalError> {
        if self.is_empty() {
            return Err(InternalError::InsufficientBytesForRead(1, 0));
        }
        match self.buffer.get(self.begin) {
            Some(ret) => {
                self.begin += 1;
                Ok(*ret)
            }
            None => Err(InternalError::InsufficientBytesForRead(1, 0)),
        }
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Result<u8, InternalError> {
        if self.len() <= offset {
            return Err(InternalError::InsufficientBytesForRead(offset + 1, self.len()));
        }
        match self.buffer.get(self.begin + offset) {
            Some(ret) => Ok(*ret),
            None => Err(InternalError::InsufficientBytesForRead(offset + 1, self.len())),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b2 << 8) | b1)
    }

    pub(crate) async fn read_some<T: AsyncRead + Unpin>(
        &mut self,
        io: &mut T,
    ) -> Result<usize, std::io::Error> {
        // before we read any data, check to see if the buffer is empty and adjust the indices
        // this allows us to make the biggest read possible, and avoids buffer shifting later
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // if we've reached capacity, but still need more data we have to shift
        if self.end == self.buffer.capacity() {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        let count = io.read(&mut self.buffer[self.end..]).await?;

        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_when_reading_too_many_bytes() {
        let mut buffer = ReadBuffer::new(10);
        assert_eq!(
            buffer.read_u8(),
            Err(InternalError::InsufficientBytesForRead(1, 0))
        );
        assert_eq!(
            buffer.read(1).unwrap_err(),
            InternalError::InsufficientBytesForRead(1, 0)
        );
    }

    #[tokio::test]
    async fn shifts_contents_when_buffer_at_capacity() {
        let mut buffer = ReadBuffer::new(3);
        let (mut tx, mut rx) = tokio::io::duplex(8);

        tokio::io::AsyncWriteExt::write_all(&mut tx, &[0x01, 0x02, 0x03])
            .await
            .unwrap();
        assert_eq!(buffer.read_some(&mut rx).await.unwrap(), 3);
        assert_eq!(buffer.read(2).unwrap(), &[0x01, 0x02]);

        tokio::io::AsyncWriteExt::write_all(&mut tx, &[0x04, 0x05])
            .await
            .unwrap();
        assert_eq!(buffer.read_some(&mut rx).await.unwrap(), 2);
        assert_eq!(buffer.read(3).unwrap(), &[0x03, 0x04, 0x05]);
    }
}
