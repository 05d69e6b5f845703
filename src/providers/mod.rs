//! The two concrete providers: streaming applications and polled devices.

pub mod application;
pub mod device;

pub use application::ApplicationPvProvider;
pub use device::DevicePvProvider;
