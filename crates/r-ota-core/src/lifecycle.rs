//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Lifecycle interface consumed by the host update manager."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::path::Path;

use serde_json::Value;

use crate::error::Result;

/// Operations the host update manager drives, in roughly this order:
/// `init`, `prepare`, `update`, then `apply` or `revert`, and finally `close`.
///
/// The host serializes calls per instance; `&mut self` makes that explicit.
/// The `bool` returned by `update`, `revert`, and `apply` tells the host whether a
/// reboot is required before the next step.
pub trait UpdateModule {
    /// Module identifier, also its key in state storage.
    fn id(&self) -> &str;

    /// Called once before the first operation.
    fn init(&mut self) -> Result<()>;

    /// Called once when the host shuts the module down.
    fn close(&mut self) -> Result<()>;

    /// Version currently considered active on the device.
    fn vendor_version(&self) -> &str;

    /// Stage `image_path` and hand it to the device as `vendor_version`.
    fn prepare(
        &mut self,
        image_path: &Path,
        vendor_version: &str,
        annotations: Option<&Value>,
    ) -> Result<()>;

    /// Install and activate the prepared image.
    fn update(&mut self) -> Result<bool>;

    /// Roll back a prepared or activated image.
    fn revert(&mut self) -> Result<bool>;

    /// Finish the update cycle.
    fn apply(&mut self) -> Result<bool>;

    /// Reboot the component.
    fn reboot(&mut self) -> Result<()>;
}
