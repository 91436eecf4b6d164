// Capability query - what an adapter can do for a given surface
//
// Produces plain records that the selector scores. Nothing here decides
// anything; an adapter with no formats or no queue families is still
// reported, the selector is the one that skips it.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;

use super::error::SelectionError;
use super::{Instance, Surface};

/// Device-type class consulted by the adapter score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Discrete,
    Integrated,
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceClass {
    fn from(device_type: vk::PhysicalDeviceType) -> Self {
        match device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceClass::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceClass::Integrated,
            _ => DeviceClass::Other,
        }
    }
}

/// Surface limits and the formats / present modes on offer
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        Ok(Self {
            capabilities: surface.capabilities(physical_device)?,
            formats: surface.formats(physical_device)?,
            present_modes: surface.present_modes(physical_device)?,
        })
    }

    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// Everything the selector needs to know about one adapter.
///
/// Generic over the handle so selection can run on synthetic candidates.
#[derive(Debug, Clone)]
pub struct AdapterInfo<H = vk::PhysicalDevice> {
    pub handle: H,
    pub name: String,
    pub class: DeviceClass,
    pub extensions: Vec<String>,
    pub surface: SurfaceSupport,
    pub queue_families: Vec<QueueFamily>,
}

impl<H> AdapterInfo<H> {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

/// Query one adapter against `surface`
pub fn query_adapter(
    instance: &Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> Result<AdapterInfo> {
    let props = unsafe { instance.instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    let extensions = unsafe {
        instance
            .instance
            .enumerate_device_extension_properties(physical_device)
    }
    .with_context(|| format!("Failed to enumerate extensions of {}", name))?
    .iter()
    .map(|ext| {
        unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    })
    .collect();

    let surface_support = SurfaceSupport::query(surface, physical_device)
        .with_context(|| format!("Failed to query surface support of {}", name))?;

    let family_props = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(physical_device)
    };
    let queue_families = family_props
        .iter()
        .enumerate()
        .map(|(i, props)| {
            let index = i as u32;
            Ok(QueueFamily {
                index,
                flags: props.queue_flags,
                queue_count: props.queue_count,
                supports_present: surface.supports_present(physical_device, index)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AdapterInfo {
        handle: physical_device,
        name,
        class: props.device_type.into(),
        extensions,
        surface: surface_support,
        queue_families,
    })
}

/// Query every adapter the runtime exposes.
///
/// An adapter whose query fails is skipped with a warning, others may still work.
pub fn enumerate_adapters(instance: &Instance, surface: &Surface) -> Result<Vec<AdapterInfo>> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let queried = devices
        .into_iter()
        .map(|device| query_adapter(instance, surface, device))
        .collect();

    Ok(keep_queried(queried)?)
}

/// Drop the adapters whose query failed.
///
/// No adapters at all is `NoAdapter`; adapters that all failed their query
/// are `NoSelectableAdapter`.
pub fn keep_queried<H>(
    queried: Vec<Result<AdapterInfo<H>>>,
) -> Result<Vec<AdapterInfo<H>>, SelectionError> {
    if queried.is_empty() {
        return Err(SelectionError::NoAdapter);
    }

    let adapters: Vec<_> = queried
        .into_iter()
        .filter_map(|result| match result {
            Ok(info) => {
                log::debug!(
                    "Found {} ({:?}, {} queue families)",
                    info.name,
                    info.class,
                    info.queue_families.len()
                );
                Some(info)
            }
            Err(e) => {
                log::warn!("Skipping adapter: {:?}", e);
                None
            }
        })
        .collect();

    if adapters.is_empty() {
        return Err(SelectionError::NoSelectableAdapter);
    }
    Ok(adapters)
}
