//! Integer label types accepted as input and produced as output.

/// A discrete segmentation label stored in a volume.
///
/// Class `k` of the fused label space is the label whose value is `k`.
pub trait Label: Copy + Send + Sync + std::fmt::Debug + 'static {
    /// Largest value representable by this label type.
    const MAX_VALUE: u32;

    fn value(self) -> u32;

    /// `None` if `value` does not fit this label type.
    fn from_value(value: u32) -> Option<Self>;

    #[inline]
    fn class_index(self) -> usize {
        self.value() as usize
    }
}

macro_rules! impl_label {
    ($($t:ty),*) => {
        $(
            impl Label for $t {
                const MAX_VALUE: u32 = <$t>::MAX as u32;

                #[inline]
                fn value(self) -> u32 {
                    self as u32
                }

                #[inline]
                fn from_value(value: u32) -> Option<Self> {
                    <$t>::try_from(value).ok()
                }
            }
        )*
    };
}

impl_label!(u8, u16, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_value_respects_range() {
        assert_eq!(u8::from_value(255), Some(255u8));
        assert_eq!(u8::from_value(256), None);
        assert_eq!(u16::from_value(256), Some(256u16));
        assert_eq!(u32::from_value(u32::MAX), Some(u32::MAX));
    }

    #[test]
    fn test_class_index() {
        assert_eq!(7u8.class_index(), 7);
        assert_eq!(u16::MAX.class_index(), 65535);
    }
}
