// Window surface - connection between the Vulkan instance and the window
//
// Created from the raw window/display handles winit exposes. Only the
// platforms we can name an extension for are supported.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use super::Instance;

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new(instance: Arc<Instance>, window: &Window) -> Result<Self> {
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();

        let entry = &instance.entry;
        let raw = &instance.instance;

        let surface = unsafe {
            match (display_handle, window_handle) {
                (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                    let dpy = display
                        .display
                        .context("Xlib display handle without a display")?;
                    let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(dpy.as_ptr() as *mut vk::Display)
                        .window(handle.window);
                    khr::XlibSurface::new(entry, raw).create_xlib_surface(&create_info, None)
                }
                (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                    let connection = display
                        .connection
                        .context("Xcb display handle without a connection")?;
                    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection.as_ptr() as *mut vk::xcb_connection_t)
                        .window(handle.window.get());
                    khr::XcbSurface::new(entry, raw).create_xcb_surface(&create_info, None)
                }
                (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                    let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display.display.as_ptr())
                        .surface(handle.surface.as_ptr());
                    khr::WaylandSurface::new(entry, raw)
                        .create_wayland_surface(&create_info, None)
                }
                (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                    let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0)
                        as *const std::ffi::c_void;
                    let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
                    let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                        .hinstance(hinstance)
                        .hwnd(hwnd);
                    khr::Win32Surface::new(entry, raw).create_win32_surface(&create_info, None)
                }
                _ => anyhow::bail!("Unsupported window handle type"),
            }
        }
        .context("Failed to create window surface")?;

        let loader = khr::Surface::new(entry, raw);

        Ok(Self {
            surface,
            loader,
            instance,
        })
    }

    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
        .context("Failed to query surface capabilities")
    }

    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
        .context("Failed to query surface formats")
    }

    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
        .context("Failed to query present modes")
    }

    /// Can queue family `family` present to this surface?
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.surface)
        }
        .context("Failed to query surface support")
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
