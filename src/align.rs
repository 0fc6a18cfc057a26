/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two.
///
/// # Examples
///
/// ```rust
/// use rblock::align_up;
///
/// assert_eq!(align_up!(13, 8), 16);
/// assert_eq!(align_up!(16, 8), 16);
/// assert_eq!(align_up!(0, 4), 0);
/// ```
#[macro_export]
macro_rules! align_up {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` down to the previous multiple of `align`, which must be a
/// power of two.
///
/// ```rust
/// use rblock::align_down;
///
/// assert_eq!(align_down!(13, 8), 8);
/// assert_eq!(align_down!(7, 8), 0);
/// ```
#[macro_export]
macro_rules! align_down {
  ($value:expr, $align:expr) => {
    $value & !($align - 1)
  };
}

/// Same as [`align_up!`] but returns `None` instead of wrapping around when
/// `value` is too close to `usize::MAX`. Used for sizes that come straight
/// from callers.
#[inline]
pub const fn checked_align_up(
  value: usize,
  align: usize,
) -> Option<usize> {
  match value.checked_add(align - 1) {
    Some(bumped) => Some(align_down!(bumped, align)),
    None => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::vec::Vec;

  #[test]
  fn test_align_up() {
    for align in [1usize, 2, 4, 8, 16] {
      let mut alignments = Vec::new();

      for i in 0..10 {
        let sizes = (align * i + 1)..=(align * (i + 1));

        let expected_alignment = align * (i + 1);

        alignments.push((sizes, expected_alignment));
      }

      for (sizes, expected) in alignments {
        for size in sizes {
          assert_eq!(expected, align_up!(size, align));
        }
      }
    }
  }

  #[test]
  fn test_align_down() {
    assert_eq!(align_down!(0usize, 8), 0);
    assert_eq!(align_down!(15usize, 8), 8);
    assert_eq!(align_down!(16usize, 8), 16);
    assert_eq!(align_down!(4097usize, 4096), 4096);
  }

  #[test]
  fn test_checked_align_up() {
    assert_eq!(checked_align_up(9, 8), Some(16));
    assert_eq!(checked_align_up(usize::MAX - 7, 8), Some(usize::MAX - 7));
    assert_eq!(checked_align_up(usize::MAX - 6, 8), None);
  }
}
