pub mod address;
pub mod constants;
pub mod conversions;
pub mod logger;

pub use self::address::Address;
