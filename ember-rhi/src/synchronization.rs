/// A non-owning fence handle issued by the backend.
///
/// The backend signals the fence when all GPU work submitted before it has
/// completed; the engine only ever polls it through
/// [`DeviceBackend::is_fence_signaled`](crate::DeviceBackend::is_fence_signaled).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FenceId(pub u64);
