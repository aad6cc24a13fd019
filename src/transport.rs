//! CAN transport implementations.
//!
//! | Transport             | Feature | Platform | Extended status |
//! |-----------------------|---------|----------|-----------------|
//! | [`VirtualBus`]        | -       | any      | optional        |
//! | `SocketCanTransport`  | `can`   | Linux    | no              |

pub mod virtual_bus;

#[cfg(all(feature = "can", target_os = "linux"))]
pub mod socketcan;

pub use virtual_bus::VirtualBus;

#[cfg(all(feature = "can", target_os = "linux"))]
pub use self::socketcan::SocketCanTransport;
