pub mod battery;
pub mod convert;
pub mod device;
pub mod tariff;

pub use battery::*;
pub use convert::{battery_from_value, device_from_value, safe_convert, RecordError};
pub use device::*;
pub use tariff::*;
