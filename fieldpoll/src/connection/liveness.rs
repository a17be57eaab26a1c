use crate::types::DeviceId;

/// Device-shadow collaborator notified of communication symptoms
///
/// The connection never decides that a device is offline. It reports every failed
/// transaction that involved the device and leaves debouncing to the implementation.
pub trait LivenessSink: Send + Sync {
    /// A transaction involving `device` failed
    fn may_be_offline(&self, device: &DeviceId);

    /// At least one value of `device` was decoded successfully
    fn set_online(&self, _device: &DeviceId) {}
}

/// Sink that ignores every signal
#[derive(Copy, Clone, Debug, Default)]
pub struct NullLiveness;

impl LivenessSink for NullLiveness {
    fn may_be_offline(&self, _device: &DeviceId) {}
}
