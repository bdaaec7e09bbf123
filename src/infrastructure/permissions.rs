//! Permission capability consumed by the session before its first scan.
//!
//! Mobile platforms route this to an OS prompt; on desktop the stack
//! handles access itself and [`AlwaysGranted`] is the right collaborator.

use async_trait::async_trait;

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Ask for radio access. Returning `false` blocks scanning.
    async fn request_permission(&self) -> bool;
}

/// Grants unconditionally.
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn request_permission(&self) -> bool {
        true
    }
}
