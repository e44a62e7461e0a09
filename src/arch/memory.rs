// Device memory: a flat little-endian byte array at a fixed base address.

use crate::error::{Error, Result};
use crate::isa::ElemWidth;

/// Integer element types a quantized tensor can hold.
pub trait Element: Copy + Default + PartialEq + std::fmt::Debug + 'static {
  const WIDTH: ElemWidth;
  const SIGNED: bool = true;

  fn to_i64(self) -> i64;
  /// Keeps the low `WIDTH` bits.
  fn from_i64(value: i64) -> Self;
  fn write_le(self, out: &mut [u8]);
  fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
  ($ty:ty, $width:expr) => {
    impl Element for $ty {
      const WIDTH: ElemWidth = $width;

      fn to_i64(self) -> i64 {
        self as i64
      }

      fn from_i64(value: i64) -> Self {
        value as $ty
      }

      fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
      }

      fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; std::mem::size_of::<$ty>()];
        raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
        <$ty>::from_le_bytes(raw)
      }
    }
  };
}

impl_element!(i8, ElemWidth::B8);
impl_element!(i16, ElemWidth::B16);
impl_element!(i32, ElemWidth::B32);
impl_element!(i64, ElemWidth::B64);

/// A contiguous block handed out by the bump allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub addr: u64,
  pub len: usize,
}

impl Region {
  pub fn end(&self) -> u64 {
    self.addr + self.len as u64
  }

  /// Address of element `index` of width `T`.
  pub fn at<T: Element>(&self, index: usize) -> u64 {
    self.addr + (index * T::WIDTH.bytes()) as u64
  }
}

#[derive(Debug, Clone)]
pub struct Dram {
  base: u64,
  data: Vec<u8>,
  next: u64,
}

impl Dram {
  pub fn new(base: u64, size: usize) -> Self {
    Self {
      base,
      data: vec![0; size],
      next: base,
    }
  }

  pub fn base(&self) -> u64 {
    self.base
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }

  /// Bytes still available to `alloc`.
  pub fn available(&self) -> usize {
    (self.base + self.data.len() as u64 - self.next) as usize
  }

  fn offset(&self, addr: u64, len: usize) -> Option<usize> {
    let off = addr.checked_sub(self.base)?;
    let end = off.checked_add(len as u64)?;
    (end <= self.data.len() as u64).then_some(off as usize)
  }

  pub fn contains(&self, addr: u64, len: usize) -> bool {
    self.offset(addr, len).is_some()
  }

  /// Bump-allocate `len` bytes aligned to `align` (a power of two).
  pub fn alloc(&mut self, len: usize, align: usize) -> Result<Region> {
    let align = align.max(1) as u64;
    let addr = (self.next + align - 1) & !(align - 1);
    let end = addr + len as u64;
    let limit = self.base + self.data.len() as u64;
    if end > limit {
      return Err(Error::OutOfMemory {
        requested: len,
        available: self.available(),
      });
    }
    self.next = end;
    Ok(Region { addr, len })
  }

  /// Allocate and fill a region with `data`.
  pub fn upload<T: Element>(&mut self, data: &[T], align: usize) -> Result<Region> {
    let region = self.alloc(data.len() * T::WIDTH.bytes(), align)?;
    self.write_slice(region.addr, data)?;
    Ok(region)
  }

  /// Current allocation watermark, for a later `release_to`.
  pub fn mark(&self) -> u64 {
    self.next
  }

  /// Forget every allocation made after `mark`. Contents are left in place.
  pub fn release_to(&mut self, mark: u64) {
    self.next = mark.clamp(self.base, self.next);
  }


  // Host accessors: out-of-range accesses are errors.

  pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8]> {
    let off = self.offset(addr, len).ok_or(Error::OutOfBounds { addr, len })?;
    Ok(&self.data[off..off + len])
  }

  pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
    let len = bytes.len();
    let off = self.offset(addr, len).ok_or(Error::OutOfBounds { addr, len })?;
    self.data[off..off + len].copy_from_slice(bytes);
    Ok(())
  }

  pub fn copy_within(&mut self, src: u64, dst: u64, len: usize) -> Result<()> {
    let s = self.offset(src, len).ok_or(Error::OutOfBounds { addr: src, len })?;
    let d = self.offset(dst, len).ok_or(Error::OutOfBounds { addr: dst, len })?;
    self.data.copy_within(s..s + len, d);
    Ok(())
  }

  pub fn read<T: Element>(&self, addr: u64) -> Result<T> {
    Ok(T::read_le(self.read_bytes(addr, T::WIDTH.bytes())?))
  }

  pub fn write<T: Element>(&mut self, addr: u64, value: T) -> Result<()> {
    let len = T::WIDTH.bytes();
    let off = self.offset(addr, len).ok_or(Error::OutOfBounds { addr, len })?;
    value.write_le(&mut self.data[off..off + len]);
    Ok(())
  }

  pub fn read_slice<T: Element>(&self, addr: u64, count: usize) -> Result<Vec<T>> {
    let width = T::WIDTH.bytes();
    let bytes = self.read_bytes(addr, count * width)?;
    Ok(bytes.chunks_exact(width).map(T::read_le).collect())
  }

  pub fn write_slice<T: Element>(&mut self, addr: u64, values: &[T]) -> Result<()> {
    let width = T::WIDTH.bytes();
    let len = values.len() * width;
    let off = self.offset(addr, len).ok_or(Error::OutOfBounds { addr, len })?;
    for (chunk, value) in self.data[off..off + len].chunks_exact_mut(width).zip(values) {
      value.write_le(chunk);
    }
    Ok(())
  }

  pub fn fill(&mut self, addr: u64, len: usize, byte: u8) -> Result<()> {
    let off = self.offset(addr, len).ok_or(Error::OutOfBounds { addr, len })?;
    self.data[off..off + len].fill(byte);
    Ok(())
  }

  // Bus-side accessors used by the device: out-of-range loads read zero and
  // out-of-range stores are dropped.

  pub fn bus_load(&self, addr: u64, width: ElemWidth, signed: bool) -> i64 {
    let len = width.bytes();
    let Some(off) = self.offset(addr, len) else {
      log::warn!("device load outside memory: addr={:#x} len={}", addr, len);
      return 0;
    };
    let mut raw = [0u8; 8];
    raw[..len].copy_from_slice(&self.data[off..off + len]);
    let value = u64::from_le_bytes(raw);
    let shift = 64 - 8 * len as u32;
    if signed {
      ((value << shift) as i64) >> shift
    } else {
      value as i64
    }
  }

  pub fn bus_store(&mut self, addr: u64, width: ElemWidth, value: i64) {
    let len = width.bytes();
    let Some(off) = self.offset(addr, len) else {
      log::warn!("device store outside memory dropped: addr={:#x} len={}", addr, len);
      return;
    };
    self.data[off..off + len].copy_from_slice(&value.to_le_bytes()[..len]);
  }
}
