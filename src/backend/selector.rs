// Adapter and queue family selection
//
// Small additive scores, best kept with `>=` so that a later candidate of
// equal score replaces an earlier one. A best score of 0 means nothing
// usable was found.

use ash::vk;

use super::capability::{AdapterInfo, DeviceClass, QueueFamily};
use super::error::SelectionError;

/// Device extensions an adapter must offer to be considered
pub const REQUIRED_DEVICE_EXTENSIONS: &[&str] = &["VK_KHR_swapchain"];

/// Score of a queue family that cannot present to the surface
pub const NO_PRESENT_SCORE: i64 = -1;

/// The chosen adapter and the queue families we will use on it
#[derive(Debug, Clone)]
pub struct Selection<H = vk::PhysicalDevice> {
    pub adapter: AdapterInfo<H>,
    pub graphics_family: u32,
    pub transfer_family: u32,
}

pub fn adapter_score(class: DeviceClass) -> i32 {
    match class {
        DeviceClass::Discrete => 100,
        DeviceClass::Integrated => 50,
        DeviceClass::Other => 0,
    }
}

/// Has every required extension, at least one surface format and one
/// present mode, and at least one queue family
pub fn is_adapter_eligible<H>(adapter: &AdapterInfo<H>, required_extensions: &[&str]) -> bool {
    required_extensions
        .iter()
        .all(|ext| adapter.has_extension(ext))
        && adapter.surface.is_adequate()
        && !adapter.queue_families.is_empty()
}

pub fn select_adapter<H>(
    candidates: Vec<AdapterInfo<H>>,
    required_extensions: &[&str],
) -> Result<AdapterInfo<H>, SelectionError> {
    if candidates.is_empty() {
        return Err(SelectionError::NoAdapter);
    }

    let mut best = None;
    let mut best_score = 0;

    for candidate in candidates {
        if !is_adapter_eligible(&candidate, required_extensions) {
            log::debug!("{} lacks required support, skipped", candidate.name);
            continue;
        }

        let score = adapter_score(candidate.class);
        if score >= best_score {
            best_score = score;
            best = Some(candidate);
        }
    }

    match best {
        Some(adapter) if best_score > 0 => Ok(adapter),
        _ => Err(SelectionError::NoSelectableAdapter),
    }
}

/// +50 for graphics, +50 for no transfer, times the queue count.
/// A family that cannot present scores exactly -1.
pub fn queue_score(family: &QueueFamily) -> i64 {
    if !family.supports_present {
        return NO_PRESENT_SCORE;
    }

    let mut score = 0;
    if family.flags.contains(vk::QueueFlags::GRAPHICS) {
        score += 50;
    }
    if !family.flags.contains(vk::QueueFlags::TRANSFER) {
        score += 50;
    }
    score * i64::from(family.queue_count)
}

pub fn select_graphics_queue_family(families: &[QueueFamily]) -> Result<u32, SelectionError> {
    let mut best = None;
    let mut best_score = 0;

    for family in families {
        let score = queue_score(family);
        if score >= best_score {
            best_score = score;
            best = Some(family.index);
        }
    }

    match best {
        Some(index) if best_score > 0 => Ok(index),
        _ => Err(SelectionError::NoQueueFamily),
    }
}

/// Family used for staging uploads.
///
/// Prefers a dedicated transfer family (no graphics), one without compute
/// over one with it, lowest index first. Falls back to the graphics family.
pub fn select_transfer_queue_family(families: &[QueueFamily], graphics_family: u32) -> u32 {
    families
        .iter()
        .filter(|f| f.queue_count > 0)
        .filter(|f| f.flags.contains(vk::QueueFlags::TRANSFER))
        .filter(|f| !f.flags.contains(vk::QueueFlags::GRAPHICS))
        .min_by_key(|f| (f.flags.contains(vk::QueueFlags::COMPUTE), f.index))
        .map(|f| f.index)
        .unwrap_or(graphics_family)
}

/// Pick the adapter, then its graphics and transfer families
pub fn select<H>(
    candidates: Vec<AdapterInfo<H>>,
    required_extensions: &[&str],
) -> Result<Selection<H>, SelectionError> {
    let adapter = select_adapter(candidates, required_extensions)?;
    let graphics_family = select_graphics_queue_family(&adapter.queue_families)?;
    let transfer_family = select_transfer_queue_family(&adapter.queue_families, graphics_family);

    log::info!("{} selected", adapter.name);
    log::info!(
        "Queue families: graphics {}, transfer {}",
        graphics_family,
        transfer_family
    );

    Ok(Selection {
        adapter,
        graphics_family,
        transfer_family,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::capability::SurfaceSupport;

    fn usable_surface() -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    fn family(index: u32, flags: vk::QueueFlags, queue_count: u32, present: bool) -> QueueFamily {
        QueueFamily {
            index,
            flags,
            queue_count,
            supports_present: present,
        }
    }

    fn adapter(id: usize, class: DeviceClass) -> AdapterInfo<usize> {
        AdapterInfo {
            handle: id,
            name: format!("adapter {}", id),
            class,
            extensions: vec!["VK_KHR_swapchain".to_string()],
            surface: usable_surface(),
            queue_families: vec![family(0, vk::QueueFlags::GRAPHICS, 1, true)],
        }
    }

    #[test]
    fn discrete_beats_integrated() {
        let candidates = vec![
            adapter(0, DeviceClass::Integrated),
            adapter(1, DeviceClass::Discrete),
            adapter(2, DeviceClass::Other),
        ];
        let chosen = select_adapter(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle, 1);
    }

    #[test]
    fn equal_scores_pick_the_last_one() {
        let candidates = vec![
            adapter(0, DeviceClass::Discrete),
            adapter(1, DeviceClass::Integrated),
            adapter(2, DeviceClass::Discrete),
            adapter(3, DeviceClass::Integrated),
        ];
        let chosen = select_adapter(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle, 2);
    }

    #[test]
    fn missing_extension_excludes_discrete_adapter() {
        let mut no_swapchain = adapter(0, DeviceClass::Discrete);
        no_swapchain.extensions.clear();
        let candidates = vec![no_swapchain, adapter(1, DeviceClass::Integrated)];

        let chosen = select_adapter(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle, 1);
    }

    #[test]
    fn empty_formats_or_present_modes_exclude_adapter() {
        let mut no_formats = adapter(0, DeviceClass::Discrete);
        no_formats.surface.formats.clear();
        let mut no_modes = adapter(1, DeviceClass::Discrete);
        no_modes.surface.present_modes.clear();
        let candidates = vec![no_formats, no_modes, adapter(2, DeviceClass::Integrated)];

        let chosen = select_adapter(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(chosen.handle, 2);
    }

    #[test]
    fn adapter_without_queue_families_is_skipped() {
        let mut no_families = adapter(0, DeviceClass::Discrete);
        no_families.queue_families.clear();
        let candidates = vec![no_families, adapter(1, DeviceClass::Integrated)];

        let selection = select(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(selection.adapter.handle, 1);
        assert_eq!(selection.graphics_family, 0);
    }

    #[test]
    fn all_filtered_out_is_not_selectable() {
        let mut a = adapter(0, DeviceClass::Discrete);
        a.extensions.clear();
        let mut b = adapter(1, DeviceClass::Integrated);
        b.surface.formats.clear();

        let err = select_adapter(vec![a, b], REQUIRED_DEVICE_EXTENSIONS).unwrap_err();
        assert_eq!(err, SelectionError::NoSelectableAdapter);
    }

    #[test]
    fn only_other_class_is_not_selectable() {
        let candidates = vec![adapter(0, DeviceClass::Other), adapter(1, DeviceClass::Other)];
        let err = select_adapter(candidates, REQUIRED_DEVICE_EXTENSIONS).unwrap_err();
        assert_eq!(err, SelectionError::NoSelectableAdapter);
    }

    #[test]
    fn no_candidates_is_no_adapter() {
        let err = select_adapter::<usize>(vec![], REQUIRED_DEVICE_EXTENSIONS).unwrap_err();
        assert_eq!(err, SelectionError::NoAdapter);
    }

    #[test]
    fn queue_scores() {
        let graphics_only = family(0, vk::QueueFlags::GRAPHICS, 2, true);
        assert_eq!(queue_score(&graphics_only), 200);

        let graphics_transfer = family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, true);
        assert_eq!(queue_score(&graphics_transfer), 50);

        let transfer_only = family(2, vk::QueueFlags::TRANSFER, 4, true);
        assert_eq!(queue_score(&transfer_only), 0);

        let no_present = family(3, vk::QueueFlags::GRAPHICS, 16, false);
        assert_eq!(queue_score(&no_present), -1);

        let no_present_transfer =
            family(4, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, false);
        assert_eq!(queue_score(&no_present_transfer), -1);
    }

    #[test]
    fn best_queue_family_wins() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE, 16, true),
            family(1, vk::QueueFlags::GRAPHICS, 1, true),
            family(2, vk::QueueFlags::TRANSFER, 2, true),
        ];
        // 50 * 16 = 800 beats 100 * 1
        assert_eq!(select_graphics_queue_family(&families), Ok(0));
    }

    #[test]
    fn equal_queue_scores_pick_the_last_one() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, 1, true),
            family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 2, true),
            family(2, vk::QueueFlags::GRAPHICS, 1, false),
        ];
        assert_eq!(select_graphics_queue_family(&families), Ok(1));
    }

    #[test]
    fn families_without_present_never_win() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, 8, false),
            family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, true),
        ];
        assert_eq!(select_graphics_queue_family(&families), Ok(1));
    }

    #[test]
    fn no_usable_family_fails() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, 1, false),
            family(1, vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE, 1, true),
        ];
        assert_eq!(
            select_graphics_queue_family(&families),
            Err(SelectionError::NoQueueFamily)
        );
        assert_eq!(
            select_graphics_queue_family(&[]),
            Err(SelectionError::NoQueueFamily)
        );
    }

    #[test]
    fn dedicated_transfer_family_preferred() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let families = [
            family(0, all, 16, true),
            family(1, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2, false),
            family(2, vk::QueueFlags::TRANSFER, 1, false),
        ];
        assert_eq!(select_transfer_queue_family(&families, 0), 2);
        assert_eq!(select_transfer_queue_family(&families[..2], 0), 1);
        assert_eq!(select_transfer_queue_family(&families[..1], 0), 0);
    }

    #[test]
    fn select_reports_adapter_and_families() {
        let mut a = adapter(7, DeviceClass::Discrete);
        a.queue_families = vec![
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, true),
            family(1, vk::QueueFlags::TRANSFER, 1, false),
        ];

        let selection = select(vec![a], REQUIRED_DEVICE_EXTENSIONS).unwrap();
        assert_eq!(selection.adapter.handle, 7);
        assert_eq!(selection.graphics_family, 0);
        assert_eq!(selection.transfer_family, 1);
    }

    #[test]
    fn select_fails_when_adapter_has_no_graphics_family() {
        let mut a = adapter(0, DeviceClass::Integrated);
        a.queue_families = vec![family(0, vk::QueueFlags::TRANSFER, 1, true)];

        let err = select(vec![a], REQUIRED_DEVICE_EXTENSIONS).unwrap_err();
        assert_eq!(err, SelectionError::NoQueueFamily);
    }
}
