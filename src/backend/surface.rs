// Presentation surface - platform window connection
//
// The instance needs the surface extensions for the running platform before
// the surface can exist, so this is split in two: pick extensions from the
// display handle, then create the surface from display + window handles.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;

use ash::extensions::khr;

/// Instance extensions needed to present on `display`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display platform: {:?}", other),
    };

    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Create a surface for the window.
///
/// # Safety
/// The handles must stay valid for the surface's lifetime, and `instance`
/// must have been created with [`required_extensions`] for `display`.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as vk::HINSTANCE;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(handle.hwnd.get() as vk::HWND);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)
        }

        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib display handle has no connection")?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr().cast())
                .window(handle.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)
        }

        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .context("XCB display handle has no connection")?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr().cast())
                .window(handle.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)
        }

        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr().cast())
                .surface(handle.surface.as_ptr().cast());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)
        }

        _ => anyhow::bail!("Unsupported window handle type"),
    };

    surface.context("Failed to create window surface")
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandDisplayHandle, WindowsDisplayHandle};
    use std::ffi::CStr;
    use std::ptr::NonNull;

    fn names(extensions: &[*const c_char]) -> Vec<&'static CStr> {
        extensions
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect()
    }

    #[test]
    fn test_windows_needs_win32_surface() {
        let display = RawDisplayHandle::Windows(WindowsDisplayHandle::new());
        let extensions = names(&required_extensions(display).unwrap());
        assert_eq!(extensions, vec![khr::Surface::name(), khr::Win32Surface::name()]);
    }

    #[test]
    fn test_wayland_needs_wayland_surface() {
        let mut dummy = 0u8;
        let display = RawDisplayHandle::Wayland(WaylandDisplayHandle::new(
            NonNull::from(&mut dummy).cast(),
        ));
        let extensions = names(&required_extensions(display).unwrap());
        assert_eq!(extensions[1], khr::WaylandSurface::name());
    }
}
