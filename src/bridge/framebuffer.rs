//! Ownership of the single pixel buffer shared by EVDI and the VNC screen.

use std::fmt;
use std::ptr::NonNull;

use log::debug;

use crate::error::{BridgeError, Result};
use crate::evdi::{BufferId, BufferView, DisplayDevice, Mode};

/// The only id a buffer is ever registered under.
///
/// Reusing one id is sound only while at most one buffer is registered at a
/// time; [`FramebufferOwner::replace`] maintains that.
pub const BUFFER_ID: BufferId = BufferId(0);

/// Heap pixel storage for one mode.
///
/// The storage is shared with the kernel and the VNC server through raw
/// [`BufferView`]s, so it is held as a raw allocation rather than a `Vec`
/// that safe code could reallocate.
pub struct PixelBuffer {
    id: BufferId,
    width: u32,
    height: u32,
    stride: usize,
    data: NonNull<[u8]>,
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer for `mode`.
    ///
    /// Zero-filling keeps viewers that connect before the first damage event
    /// from being sent uninitialized memory.
    pub fn allocate(id: BufferId, mode: &Mode) -> Result<Self> {
        let stride = mode.stride();
        let len = stride
            .checked_mul(mode.height as usize)
            .ok_or(BridgeError::Allocation { bytes: usize::MAX })?;

        let mut storage: Vec<u8> = Vec::new();
        storage
            .try_reserve_exact(len)
            .map_err(|_| BridgeError::Allocation { bytes: len })?;
        storage.resize(len, 0);

        let data = NonNull::from(Box::leak(storage.into_boxed_slice()));
        debug!("Allocated {} byte pixel buffer for {}", len, mode);
        Ok(Self {
            id,
            width: mode.width,
            height: mode.height,
            stride,
            data,
        })
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents. The kernel only writes into the buffer while the
    /// bridge is inside a device call, never while this borrow is held.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` is a live allocation owned by `self` until drop, and
        // no `&mut` to it exists while `&self` is borrowed.
        unsafe { self.data.as_ref() }
    }

    /// Write access standing in for the kernel's copies.
    #[cfg(test)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `data` is owned by `self`, and the `&mut self` borrow rules
        // out any other slice of it for the lifetime of the result.
        unsafe { self.data.as_mut() }
    }

    /// Raw view handed to the device and the VNC screen.
    pub fn view(&self) -> BufferView {
        BufferView {
            id: self.id,
            ptr: self.data.cast::<u8>(),
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        // SAFETY: `data` came from `Box::leak` in `allocate` and is freed once.
        drop(unsafe { Box::from_raw(self.data.as_ptr()) });
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish()
    }
}

/// Keeps exactly one [`PixelBuffer`] alive and registered with the device.
#[derive(Debug, Default)]
pub struct FramebufferOwner {
    active: Option<PixelBuffer>,
}

impl FramebufferOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&PixelBuffer> {
        self.active.as_ref()
    }

    pub fn view(&self) -> Option<BufferView> {
        self.active.as_ref().map(PixelBuffer::view)
    }

    /// Swap the active buffer for one sized to `mode`.
    ///
    /// The previous buffer is unregistered from the device and freed before
    /// the new one is allocated and registered, so the device never has two
    /// buffers registered under [`BUFFER_ID`].
    pub fn replace<D>(&mut self, device: &mut D, mode: &Mode) -> Result<BufferView>
    where
        D: DisplayDevice + ?Sized,
    {
        self.release(device);

        let buffer = PixelBuffer::allocate(BUFFER_ID, mode)?;
        let view = buffer.view();
        device.register_buffer(view);
        debug!(
            "Registered buffer {} ({}x{}, stride {})",
            view.id.0, view.width, view.height, view.stride
        );
        self.active = Some(buffer);
        Ok(view)
    }

    /// Unregister the active buffer from the device, then free it.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: DisplayDevice + ?Sized,
    {
        if let Some(buffer) = self.active.as_ref() {
            device.unregister_buffer(buffer.id());
            debug!("Unregistered buffer {}", buffer.id().0);
        }
        self.active = None;
    }
}
