use core::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Second(pub f32);

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Celsius(pub f32);

impl Second {
    pub const fn from_millis(ms: u32) -> Self {
        Second(ms as f32 / 1000.0)
    }

    pub fn as_millis(self) -> u32 {
        libm::roundf(self.0 * 1000.0) as u32
    }
}

impl Add<Self> for Second {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Second(self.0 + rhs.0)
    }
}

impl Sub<Self> for Celsius {
    type Output = f32;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}
