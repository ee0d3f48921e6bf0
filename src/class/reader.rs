use nom::{
    IResult,
    number::complete::{be_u16, be_u32, be_u64, u8},
};

use crate::runtime::{Exception, VmResult};

/// Sequential big-endian cursor over a class-file buffer.
#[derive(Debug, Clone)]
pub struct BytecodeReader<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.input.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u1(&mut self) -> VmResult<u8> {
        self.read_with(1, u8)
    }

    pub fn read_u2(&mut self) -> VmResult<u16> {
        self.read_with(2, be_u16)
    }

    pub fn read_u4(&mut self) -> VmResult<u32> {
        self.read_with(4, be_u32)
    }

    pub fn read_u8(&mut self) -> VmResult<u64> {
        self.read_with(8, be_u64)
    }

    pub fn read_bytes(&mut self, len: usize) -> VmResult<&'a [u8]> {
        self.ensure(len)?;
        let bytes = &self.input[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> VmResult<()> {
        self.ensure(len)?;
        self.position += len;
        Ok(())
    }

    /// Splits off the next `len` bytes as an independent reader and advances
    /// past them, so a sub-structure can never read beyond its declared length.
    pub fn sub_reader(&mut self, len: usize) -> VmResult<BytecodeReader<'a>> {
        self.read_bytes(len).map(BytecodeReader::new)
    }

    fn ensure(&self, wanted: usize) -> VmResult<()> {
        if wanted > self.remaining() {
            return Err(Exception::TruncatedInput {
                wanted,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    fn read_with<T>(
        &mut self,
        width: usize,
        parser: fn(&'a [u8]) -> IResult<&'a [u8], T>,
    ) -> VmResult<T> {
        self.ensure(width)?;
        let (_, value) = parser(&self.input[self.position..]).map_err(|_| {
            Exception::TruncatedInput {
                wanted: width,
                remaining: self.remaining(),
            }
        })?;
        self.position += width;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_big_endian() {
        let bytes = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x34, 0x07, 1, 2, 3, 4, 5, 6, 7, 8];
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_u4().unwrap(), 0xcafe_babe);
        assert_eq!(reader.read_u2().unwrap(), 52);
        assert_eq!(reader.read_u1().unwrap(), 7);
        assert_eq!(reader.read_u8().unwrap(), 0x0102_0304_0506_0708);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_truncated() {
        let bytes = [0x00, 0x01, 0x02];
        let mut reader = BytecodeReader::new(&bytes);
        assert_eq!(reader.read_u2().unwrap(), 1);
        let err = reader.read_u4().unwrap_err();
        assert!(matches!(
            err,
            Exception::TruncatedInput {
                wanted: 4,
                remaining: 1
            }
        ));
        // a failed read does not move the cursor
        assert_eq!(reader.position(), 2);
        assert!(reader.skip(2).is_err());
        reader.skip(1).unwrap();
        assert!(reader.read_bytes(1).is_err());
    }

    #[test]
    fn test_sub_reader() {
        let bytes = [0, 2, 0xaa, 0xbb, 0xcc];
        let mut reader = BytecodeReader::new(&bytes);
        let len = reader.read_u2().unwrap();
        let mut sub = reader.sub_reader(len as usize).unwrap();
        assert_eq!(sub.read_bytes(2).unwrap(), &[0xaa, 0xbb]);
        assert!(sub.read_u1().is_err());
        assert_eq!(reader.read_u1().unwrap(), 0xcc);
    }
}
