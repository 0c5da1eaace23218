//! Display surface creation and management.

use cgmath::Vector2;
use failure::Fail;

/// The platform-native window handles a swapchain is built on top of.
///
/// The RHI treats these as opaque: it never dereferences them, it only forwards them to the
/// driver's surface-creation entry point for the matching platform. A backend asked to consume
/// handles for a platform it was not compiled for reports `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawWindowHandle {
    /// A Win32 window: the module instance handle and the window handle.
    Win32 {
        /// `HINSTANCE` of the module that owns the window.
        hinstance: *mut std::ffi::c_void,
        /// `HWND` of the window itself.
        hwnd: *mut std::ffi::c_void,
    },

    /// An Xlib window: the display connection and the window id.
    Xlib {
        /// Pointer to the Xlib `Display`.
        display: *mut std::ffi::c_void,
        /// The X11 window id.
        window: u64,
    },
}

/// Represents an abstract surface which provides the objects required for presentation.
///
/// The generic parameter is whatever the rendering backend needs to get at the native window.
/// The backends shipped with this crate ask for [`RawWindowHandle`], but the parameter also
/// serves as a compile time check: a window type that can only produce Xlib handles simply
/// won't implement `Surface<T>` for a backend that wants something else.
pub trait Surface<T> {
    /// Creates or retrieves the platform object of type `T`.
    fn platform_object(&mut self) -> Result<T, SurfaceError>;

    /// Retrieves the current surface size where x is width and y height.
    fn get_current_size(&self) -> Vector2<u32>;
}

/// Errors that can occur during creation/access of the underlying platform object.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
pub enum SurfaceError {
    /// Failed to create or access the underlying platform object.
    #[fail(display = "Failed to create or access the underlying object.")]
    CreationOrAccessFailed,

    /// Invalid parameters passed to surface creation.
    #[fail(display = "Invalid parameters passed: {}", details)]
    InvalidParameters {
        /// Details on invalid parameters, platform specific.
        details: String,
    },

    /// This surface can not be used for creating this object.
    #[fail(display = "This surface can not be used for creating this object.")]
    NotSupported,
}
