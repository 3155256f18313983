/// Generate `align_down_$suffix`, `align_up_$suffix` and `whole_pages_$suffix`
/// for a given integer type.
///
/// The align functions treat `alignment == 0` as a no-op (returns `value`
/// unchanged); `align_up` saturates instead of overflowing.
macro_rules! impl_align_fns {
    ($ty:ty, $suffix:ident) => {
        paste::paste! {
            /// Align `value` down to the nearest multiple of `alignment`.
            /// If `alignment` is zero, the input is returned unchanged.
            #[inline(always)]
            pub const fn [<align_down_ $suffix>](value: $ty, alignment: $ty) -> $ty {
                if alignment == 0 {
                    return value;
                }
                value & !(alignment - 1)
            }

            /// Align `value` up to the nearest multiple of `alignment`.
            /// If `alignment` is zero, the input is returned unchanged.
            #[inline(always)]
            pub const fn [<align_up_ $suffix>](value: $ty, alignment: $ty) -> $ty {
                if alignment == 0 {
                    return value;
                }
                let adjusted = value.saturating_add(alignment - 1);
                adjusted & !(alignment - 1)
            }

            /// Number of complete `page`-sized units in `bytes`; a trailing
            /// partial page is dropped. Zero `page` yields zero.
            #[inline(always)]
            pub const fn [<whole_pages_ $suffix>](bytes: $ty, page: $ty) -> $ty {
                if page == 0 {
                    return 0;
                }
                [<align_down_ $suffix>](bytes, page) / page
            }
        }
    };
}

impl_align_fns!(u64, u64);
impl_align_fns!(usize, usize);
