use bytemuck::NoUninit;

use std::fmt;
use std::mem;
use std::ops::*;

/// size in bytes
pub type ByteSize = usize;
/// offset in byte
pub type ByteOffset = isize;

/// `Address` represents an arbitrary remote-process virtual address. It is designed to do
/// address arithmetic mostly in a safe way, while marking the operations that can fault
/// (loads, stores) as unsafe. It must stay zero-overhead: memory-wise and time-wise it is
/// exactly a `usize`. The design follows the same idea used throughout this codebase for its
/// own `Address` type: address values are distinguished from plain integers so that the type
/// system catches accidental mixing of addresses, offsets and sizes.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as usize)
    }
}

impl AddAssign<ByteOffset> for Address {
    fn add_assign(&mut self, offset: ByteOffset) {
        self.0 = (self.0 as isize + offset) as usize
    }
}

impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

impl SubAssign<ByteSize> for Address {
    fn sub_assign(&mut self, offset: ByteSize) {
        self.0 -= offset;
    }
}

/// Address - Address (the first address must be higher, or equal)
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

impl BitAnd<usize> for Address {
    type Output = usize;
    fn bitand(self, other: usize) -> usize {
        self.0 & other
    }
}

impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Shl<usize> for Address {
    type Output = usize;
    fn shl(self, shift: usize) -> usize {
        self.0 << shift
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);
    /// The highest possible address.
    pub const MAX: Self = Address(usize::MAX);

    /// Create an `Address` from a raw pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    /// Create an `Address` from a mutable raw pointer.
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// Create an arbitrary `Address`.
    ///
    /// # Safety
    /// The caller must be aware that this may not be a valid remote address. This is meant for
    /// constructing addresses parsed from `/proc/<pid>/maps` or DWARF location expressions,
    /// where validity against the live process is only established by the subsequent read.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// The number of bytes between `self` and `other`. `self` must be the higher address.
    pub const fn get_extent(self, other: Address) -> ByteSize {
        self.0 - other.0
    }

    /// Add an offset to the address.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, size: usize) -> Address {
        Address(self.0 + size)
    }

    /// Subtract an offset from the address.
    #[allow(clippy::should_implement_trait)]
    pub const fn sub(self, size: usize) -> Address {
        Address(self.0 - size)
    }

    /// Is this the null address?
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Round the address up to the given alignment (which must be a power of two).
    pub const fn align_up(self, align: ByteSize) -> Address {
        Address((self.0 + align - 1) & !(align - 1))
    }

    /// Round the address down to the given alignment (which must be a power of two).
    pub const fn align_down(self, align: ByteSize) -> Address {
        Address(self.0 & !(align - 1))
    }

    /// Is the address aligned to `align` (a power of two)?
    pub const fn is_aligned_to(self, align: usize) -> bool {
        (self.0 & (align - 1)) == 0
    }

    /// Convert to a const pointer.
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Convert to a mutable pointer.
    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Convert to a `usize`.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Shift by `offset` objects of type `T`.
    pub fn shift<T>(self, offset: isize) -> Self {
        self + mem::size_of::<T>() as isize * offset
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = usize::from_str_radix(s.trim_start_matches("0x"), 16)?;
        Ok(Address(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        let addr = unsafe { Address::from_usize(1) };
        assert_eq!(addr.align_up(8), unsafe { Address::from_usize(8) });
    }

    #[test]
    fn test_align_down() {
        let addr = unsafe { Address::from_usize(9) };
        assert_eq!(addr.align_down(8), unsafe { Address::from_usize(8) });
    }

    #[test]
    fn test_is_aligned() {
        assert!(unsafe { Address::from_usize(0) }.is_aligned_to(8));
        assert!(unsafe { Address::from_usize(8) }.is_aligned_to(8));
        assert!(!unsafe { Address::from_usize(9) }.is_aligned_to(8));
    }

    #[test]
    fn test_sub() {
        let a = unsafe { Address::from_usize(0x2000) };
        let b = unsafe { Address::from_usize(0x1000) };
        assert_eq!(a - b, 0x1000);
    }

    #[test]
    fn test_from_str() {
        let addr: Address = "0x1000".parse().unwrap();
        assert_eq!(addr, unsafe { Address::from_usize(0x1000) });
    }
}
