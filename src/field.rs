use core::fmt;

/// Most custom flag bits a single field hands out, so that both fields of a
/// block fit in one `u64`.
pub const MAX_CUSTOM_BITS_PER_FIELD: u32 = 32;

/// Unsigned integers a block header can be built from. The width decides
/// the per-block overhead and how large a region can be addressed.
pub trait Offset: Copy + Eq + fmt::Debug + 'static {
  const BITS: u32;
  const ZERO: Self;

  fn to_u64(self) -> u64;

  /// Truncates to the width of `Self`.
  fn from_u64(value: u64) -> Self;
}

macro_rules! impl_offset {
  ($($ty:ty),*) => {
    $(
      impl Offset for $ty {
        const BITS: u32 = <$ty>::BITS;
        const ZERO: Self = 0;

        #[inline]
        fn to_u64(self) -> u64 {
          self as u64
        }

        #[inline]
        fn from_u64(value: u64) -> Self {
          value as $ty
        }
      }
    )*
  };
}

impl_offset!(u8, u16, u32, u64, usize);

const fn mask(bits: u32) -> u64 {
  if bits >= u64::BITS { u64::MAX } else { (1 << bits) - 1 }
}

/// How the bits of a header field are shared out:
///
/// ```text
///   field_bits - 1                          offset_bits         0
///   ┌──────────┬──────────────────────────┬───────────────────────┐
///   │   flag   │   custom flags (≤ 32)    │  offset / alignment   │
///   └──────────┴──────────────────────────┴───────────────────────┘
/// ```
///
/// Bits between the custom flags and the built-in flag, if any, stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
  field_bits: u32,
  offset_bits: u32,
}

impl FieldLayout {
  pub const fn new(
    field_bits: u32,
    offset_bits: u32,
  ) -> Self {
    assert!(field_bits <= u64::BITS, "fields wider than 64 bits are not supported");
    assert!(offset_bits < field_bits, "offset must leave room for the built-in flag");
    Self {
      field_bits,
      offset_bits,
    }
  }

  pub const fn offset_bits(&self) -> u32 {
    self.offset_bits
  }

  pub const fn custom_bits(&self) -> u32 {
    let spare = self.field_bits - 1 - self.offset_bits;
    if spare > MAX_CUSTOM_BITS_PER_FIELD {
      MAX_CUSTOM_BITS_PER_FIELD
    } else {
      spare
    }
  }

  /// Largest offset, in alignment units, this layout can store.
  pub const fn max_offset(&self) -> u64 {
    mask(self.offset_bits)
  }

  const fn offset_mask(&self) -> u64 {
    mask(self.offset_bits)
  }

  const fn custom_mask(&self) -> u64 {
    mask(self.custom_bits()) << self.offset_bits
  }

  const fn flag_mask(&self) -> u64 {
    1 << (self.field_bits - 1)
  }
}

/// One packed header word: an offset plus flags, stored in the raw integer
/// type `O`. All bit twiddling on block headers goes through here.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Field<O> {
  raw: O,
}

impl<O: Offset> Field<O> {
  pub const fn empty() -> Self {
    Self { raw: O::ZERO }
  }

  pub fn raw(self) -> O {
    self.raw
  }

  #[inline]
  pub fn offset(
    self,
    layout: FieldLayout,
  ) -> u64 {
    self.raw.to_u64() & layout.offset_mask()
  }

  #[inline]
  pub fn set_offset(
    &mut self,
    layout: FieldLayout,
    offset: u64,
  ) {
    debug_assert!(offset <= layout.max_offset(), "offset {offset} does not fit the field");
    self.update(layout.offset_mask(), offset);
  }

  #[inline]
  pub fn flag(
    self,
    layout: FieldLayout,
  ) -> bool {
    self.raw.to_u64() & layout.flag_mask() != 0
  }

  #[inline]
  pub fn set_flag(
    &mut self,
    layout: FieldLayout,
    value: bool,
  ) {
    let bits = if value { u64::MAX } else { 0 };
    self.update(layout.flag_mask(), bits);
  }

  #[inline]
  pub fn custom(
    self,
    layout: FieldLayout,
  ) -> u64 {
    (self.raw.to_u64() & layout.custom_mask()) >> layout.offset_bits
  }

  #[inline]
  pub fn set_custom(
    &mut self,
    layout: FieldLayout,
    flags: u64,
  ) {
    self.update(layout.custom_mask(), flags << layout.offset_bits);
  }

  fn update(
    &mut self,
    mask: u64,
    bits: u64,
  ) {
    let raw = (self.raw.to_u64() & !mask) | (bits & mask);
    self.raw = O::from_u64(raw);
  }
}

impl<O: Offset> fmt::Debug for Field<O> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Field({:#x})", self.raw.to_u64())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const U16_LAYOUT: FieldLayout = FieldLayout::new(16, 10);

  #[test]
  fn test_layout_bits() {
    assert_eq!(U16_LAYOUT.custom_bits(), 5);
    assert_eq!(U16_LAYOUT.max_offset(), 1023);

    let wide = FieldLayout::new(64, 8);
    assert_eq!(wide.custom_bits(), MAX_CUSTOM_BITS_PER_FIELD);

    let full = FieldLayout::new(8, 7);
    assert_eq!(full.custom_bits(), 0);
    assert_eq!(full.max_offset(), 127);
  }

  #[test]
  fn test_offset_does_not_touch_flags() {
    let mut field = Field::<u16>::empty();
    field.set_flag(U16_LAYOUT, true);
    field.set_custom(U16_LAYOUT, 0b10101);

    field.set_offset(U16_LAYOUT, 1023);
    assert_eq!(field.offset(U16_LAYOUT), 1023);
    assert!(field.flag(U16_LAYOUT));
    assert_eq!(field.custom(U16_LAYOUT), 0b10101);

    field.set_offset(U16_LAYOUT, 3);
    assert_eq!(field.offset(U16_LAYOUT), 3);
    assert_eq!(field.custom(U16_LAYOUT), 0b10101);
  }

  #[test]
  fn test_flag_does_not_touch_offset() {
    let mut field = Field::<u16>::empty();
    field.set_offset(U16_LAYOUT, 512);

    field.set_flag(U16_LAYOUT, true);
    assert_eq!(field.raw(), 0x8000 | 512);

    field.set_flag(U16_LAYOUT, false);
    assert_eq!(field.raw(), 512);
    assert!(!field.flag(U16_LAYOUT));
  }

  #[test]
  fn test_custom_is_truncated_to_its_bits() {
    let mut field = Field::<u16>::empty();
    field.set_custom(U16_LAYOUT, u64::MAX);

    assert_eq!(field.custom(U16_LAYOUT), 0b11111);
    assert_eq!(field.offset(U16_LAYOUT), 0);
    assert!(!field.flag(U16_LAYOUT));
  }

  #[test]
  fn test_u8_field() {
    let layout = FieldLayout::new(8, 4);
    let mut field = Field::<u8>::empty();

    field.set_offset(layout, 15);
    field.set_custom(layout, 0b101);
    field.set_flag(layout, true);

    assert_eq!(field.raw(), 0b1101_1111);
  }
}
