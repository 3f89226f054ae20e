use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{PageId, Result, RowId, StorageError};

/// A key type storable in a B+Tree page: fixed encoded width, cheap to clone.
pub trait IndexKey: Clone + fmt::Debug + Send + Sync {
    /// Bytes the key occupies inside a node.
    const ENCODED_SIZE: usize;

    fn write_to<B: BufMut>(&self, buf: &mut B);

    fn read_from<B: Buf>(buf: &mut B) -> Self;
}

/// A value type storable in a B+Tree leaf.
pub trait IndexValue: Copy + fmt::Debug + PartialEq + Send + Sync {
    const ENCODED_SIZE: usize;

    fn write_to<B: BufMut>(&self, buf: &mut B);

    fn read_from<B: Buf>(buf: &mut B) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_i32_le()
    }
}

impl IndexKey for i64 {
    const ENCODED_SIZE: usize = 8;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_i64_le()
    }
}

impl IndexKey for u32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_u32_le()
    }
}

impl IndexValue for i32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_i32_le()
    }
}

impl IndexValue for i64 {
    const ENCODED_SIZE: usize = 8;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i64_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_i64_le()
    }
}

impl IndexValue for u32 {
    const ENCODED_SIZE: usize = 4;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(*self);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        buf.get_u32_le()
    }
}

impl IndexValue for PageId {
    const ENCODED_SIZE: usize = 4;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.as_i32());
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        PageId::new(buf.get_i32_le())
    }
}

impl IndexValue for RowId {
    const ENCODED_SIZE: usize = 8;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_i32_le(self.page_id.as_i32());
        buf.put_u32_le(self.slot_num);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        let page_id = PageId::new(buf.get_i32_le());
        let slot_num = buf.get_u32_le();
        RowId::new(page_id, slot_num)
    }
}

/// Fixed-width opaque key of `N` bytes, ordered bytewise.
///
/// Shorter inputs are zero padded, so keys that differ only in trailing
/// zero bytes compare equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > N {
            return Err(StorageError::KeyTooLong {
                len: bytes.len(),
                width: N,
            });
        }
        let mut data = [0u8; N];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { data })
    }

    /// Encodes an integer so that bytewise order matches numeric order.
    pub fn from_i64(value: i64) -> Result<Self> {
        Self::from_bytes(&((value as u64) ^ (1 << 63)).to_be_bytes())
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        Self::from_bytes(&((value as u32) ^ (1 << 31)).to_be_bytes())
    }

    /// Inverse of [`GenericKey::from_i64`].
    pub fn to_i64(&self) -> Option<i64> {
        let head: [u8; 8] = self.data.get(..8)?.try_into().ok()?;
        Some((u64::from_be_bytes(head) ^ (1 << 63)) as i64)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .data
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        write!(f, "0x")?;
        for byte in &self.data[..end] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&self.data);
    }

    fn read_from<B: Buf>(buf: &mut B) -> Self {
        let mut data = [0u8; N];
        buf.copy_to_slice(&mut data);
        Self { data }
    }
}
