// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A macro to define bitflag sets without pulling in an external crate.

/// Defines a transparent bitflag newtype with set operations and a
/// flag-name-aware `Debug` implementation.
#[macro_export]
macro_rules! strix_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// An empty set of flags.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Creates a flag set from raw bits. Unknown bits are kept.
            pub const fn from_bits(bits: $ty) -> Self {
                Self { bits }
            }

            /// Returns the raw bit value.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Returns `true` if every flag in `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if any flag in `other` is set in `self`.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Returns `true` if no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Sets the flags in `other`.
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears the flags in `other`.
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }
        }

        impl core::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self { bits: !self.bits }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, other: Self) {
                self.bits |= other.bits;
            }
        }

        impl core::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, other: Self) {
                self.bits &= other.bits;
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut remaining = self.bits;
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    if $flag_value != 0 && (remaining & $flag_value) == $flag_value {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", stringify!($flag_name))?;
                        remaining &= !$flag_value;
                        first = false;
                    }
                )*
                if remaining != 0 {
                    if !first {
                        write!(f, " | ")?;
                    }
                    write!(f, "{remaining:#x}")?;
                    first = false;
                }
                if first {
                    write!(f, "EMPTY")?;
                }
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::strix_bitflags;

    strix_bitflags! {
        pub struct Probe: u32 {
            const A = 1 << 0;
            const B = 1 << 1;
            const C = 1 << 2;
            const AC = Self::A.bits() | Self::C.bits();
        }
    }

    #[test]
    fn empty_and_default() {
        assert_eq!(Probe::EMPTY.bits(), 0);
        assert_eq!(Probe::default(), Probe::EMPTY);
        assert!(Probe::EMPTY.is_empty());
        assert_eq!(format!("{:?}", Probe::EMPTY), "Probe(EMPTY)");
    }

    #[test]
    fn contains_and_intersects() {
        let ab = Probe::A | Probe::B;
        assert!(ab.contains(Probe::A));
        assert!(!ab.contains(Probe::AC));
        assert!(ab.intersects(Probe::AC));
        assert!(!Probe::B.intersects(Probe::AC));
    }

    #[test]
    fn insert_remove() {
        let mut flags = Probe::A;
        flags.insert(Probe::C);
        assert_eq!(flags, Probe::AC);
        flags.remove(Probe::A);
        assert_eq!(flags, Probe::C);
    }

    #[test]
    fn debug_names_flags_and_unknown_bits() {
        assert_eq!(format!("{:?}", Probe::A | Probe::C), "Probe(A | C)");
        let with_unknown = Probe::B | Probe::from_bits(1 << 7);
        assert_eq!(format!("{with_unknown:?}"), "Probe(B | 0x80)");
    }
}
