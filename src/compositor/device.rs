//! DRM device access and output discovery
//!
//! Discovery runs once at startup: pick a device node, find a connected
//! connector, its preferred mode and the CRTC behind it, then collect the
//! hardware planes that CRTC can drive. Nothing here is revisited later;
//! hot-plug is out of scope.

use std::fs::{self, File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::control::{
    connector, crtc, Device as ControlDevice, Mode, ModeTypeFlags, ResourceHandles,
};
use drm::ClientCapability;
use drm::Device;
use log::{debug, info, warn};

use super::properties;
use super::surface::PlaneSurface;
use super::{CompositorError, MAX_PLANES};

/// Handle to an open DRM device node.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

/// Immutable description of the display output driven by the compositor.
///
/// Lives for the whole process; the device handle itself is owned by the
/// [`Compositor`](super::Compositor) next to it.
pub struct DisplayOutput {
    pub connector: connector::Handle,
    pub mode: Mode,
    pub crtc: crtc::Handle,
    /// Index of the CRTC in the device's CRTC list, as used by the
    /// kernel's per-plane possible-CRTC bitmasks.
    pub crtc_index: usize,
}

/// Open the given device node, or scan /dev/dri for the first usable
/// primary node.
pub fn open_device(path: Option<&Path>) -> Result<Card, CompositorError> {
    if let Some(path) = path {
        return open_node(path);
    }

    let mut nodes: Vec<PathBuf> = fs::read_dir("/dev/dri")
        .map_err(|_| CompositorError::NoDevice)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("card"))
        })
        .collect();
    nodes.sort();

    for node in nodes {
        match open_node(&node) {
            Ok(card) => {
                info!("Using DRM device {}", node.display());
                return Ok(card);
            }
            Err(e) => debug!("Skipping {}: {e}", node.display()),
        }
    }
    Err(CompositorError::NoDevice)
}

fn open_node(path: &Path) -> Result<Card, CompositorError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| CompositorError::OpenDevice {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Card(file))
}

/// Discover the output and the planes its CRTC can drive.
pub fn discover(card: &Card) -> Result<(DisplayOutput, Vec<PlaneSurface>), CompositorError> {
    let resources = card.resource_handles().map_err(CompositorError::Resources)?;

    // First connector that is attached, or might be: composite and other
    // analog outputs report Unknown even with a display plugged in.
    let mut connector_info = None;
    for handle in resources.connectors() {
        let info = card
            .get_connector(*handle, false)
            .map_err(CompositorError::Resources)?;
        if matches!(
            info.state(),
            connector::State::Connected | connector::State::Unknown
        ) {
            connector_info = Some(info);
            break;
        }
    }
    let connector_info = connector_info.ok_or(CompositorError::NoConnector)?;

    let mode = connector_info
        .modes()
        .iter()
        .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| {
            connector_info
                .modes()
                .iter()
                .find(|m| m.mode_type().contains(ModeTypeFlags::DEFAULT))
        })
        .copied()
        .ok_or(CompositorError::NoMode)?;

    let encoder = connector_info
        .current_encoder()
        .ok_or(CompositorError::NoEncoder)?;
    let encoder_info = card
        .get_encoder(encoder)
        .map_err(CompositorError::Resources)?;
    let crtc = encoder_info.crtc().ok_or(CompositorError::NoCrtc)?;
    let crtc_index = resources
        .crtcs()
        .iter()
        .position(|&c| c == crtc)
        .ok_or(CompositorError::NoCrtc)?;

    // Atomic commits are the only submission path, so failing to enable
    // the capability is fatal. UniversalPlanes must come first or the
    // primary plane stays hidden from enumeration.
    for cap in [ClientCapability::UniversalPlanes, ClientCapability::Atomic] {
        card.set_client_capability(cap, true)
            .map_err(|e| CompositorError::Capability(cap, e))?;
    }

    let planes = discover_planes(card, &resources, crtc)?;

    Ok((
        DisplayOutput {
            connector: connector_info.handle(),
            mode,
            crtc,
            crtc_index,
        },
        planes,
    ))
}

/// Collect the planes the chosen CRTC can drive, in enumeration order,
/// bounded by [`MAX_PLANES`].
fn discover_planes(
    card: &Card,
    resources: &ResourceHandles,
    crtc: crtc::Handle,
) -> Result<Vec<PlaneSurface>, CompositorError> {
    let handles = card.plane_handles().map_err(CompositorError::Resources)?;

    let mut planes = Vec::new();
    for handle in handles {
        let info = card.get_plane(handle).map_err(CompositorError::Resources)?;
        if !resources.filter_crtcs(info.possible_crtcs()).contains(&crtc) {
            continue;
        }
        if planes.len() == MAX_PLANES {
            warn!("more hardware planes available than supported ({MAX_PLANES}), ignoring extras");
            break;
        }

        // Plane properties are consulted every frame; resolve the whole
        // set once and cache it on the plane record.
        let props = properties::load_properties(card, handle)?;
        planes.push(PlaneSurface::new(handle, props));
    }
    Ok(planes)
}
