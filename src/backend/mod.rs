pub mod device;
pub mod number;

pub use device::Device;
pub use device::Executor;
pub use device::default_device;
pub use device::serial;

pub use number::Accum;
pub use number::Logit;
