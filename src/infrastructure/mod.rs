//! Infrastructure: everything that touches the outside world — the BLE
//! stack, the permission prompt, and logging setup.

pub mod bluetooth;
pub mod logging;
pub mod permissions;
