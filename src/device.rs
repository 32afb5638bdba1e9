use crate::error::PlatformError;
use crate::types::FormatDescriptor;

/// Identity of a capture device as listed by a [`DeviceDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub id: String,
    pub name: String,
}

/// Discover and bind camera devices.
pub trait DeviceDirectory {
    type Device: CaptureDevice;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError>;

    /// Bind the device with the given identity. Fails with
    /// [`PlatformError::NotFound`] when no such device exists.
    fn bind_device(&self, id: &str) -> Result<Self::Device, PlatformError>;
}

/// A bound camera device that can be inspected.
pub trait CaptureDevice {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn supported_formats(&self) -> Result<Vec<FormatDescriptor>, PlatformError>;
}
