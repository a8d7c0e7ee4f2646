//! Compositor engine
//!
//! Owns the DRM device, the discovered output and the hardware plane
//! table, and turns the current plane state into one atomic commit per
//! refresh. Client state never reaches the kernel except through here.

pub mod device;
pub mod properties;
pub mod surface;

use std::io;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use drm::control::atomic::AtomicModeReq;
use drm::control::{crtc, framebuffer, property, AtomicCommitFlags, Device as ControlDevice};
use log::{debug, info, warn};
use thiserror::Error;

use device::{Card, DisplayOutput};
use surface::SurfaceTable;

/// Compiled upper bound on the number of hardware planes driven per output.
pub const MAX_PLANES: usize = 4;

/// Failure modes of the compositor engine.
///
/// Everything here is fatal during bring-up; during the steady-state
/// refresh only `Commit` can occur and the frame is simply skipped.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("no usable DRM device found")]
    NoDevice,
    #[error("failed to open DRM device {path}: {source}")]
    OpenDevice { path: PathBuf, source: io::Error },
    #[error("failed to read DRM resources: {0}")]
    Resources(io::Error),
    #[error("no connected connector found")]
    NoConnector,
    #[error("connector reports no preferred or default mode")]
    NoMode,
    #[error("connector has no active encoder")]
    NoEncoder,
    #[error("encoder is not bound to a known CRTC")]
    NoCrtc,
    #[error("failed to enable the {0:?} client capability: {1}")]
    Capability(drm::ClientCapability, io::Error),
    #[error("object exposes no property named {name:?}")]
    UnknownProperty { name: String },
    #[error("failed to create mode property blob: {0}")]
    ModeBlob(io::Error),
    #[error("atomic commit failed: {0}")]
    Commit(io::Error),
}

/// Compositor context: device handle, output description and plane table.
///
/// Created once at startup and owned by the main loop; there is no
/// process-wide state.
pub struct Compositor {
    card: Card,
    output: DisplayOutput,
    surfaces: SurfaceTable,
}

impl Compositor {
    /// Open the DRM device and discover the output and its planes.
    ///
    /// `device` overrides the /dev/dri scan with an explicit node.
    pub fn create(device: Option<&Path>) -> Result<Self, CompositorError> {
        let card = device::open_device(device)?;
        let (output, planes) = device::discover(&card)?;

        let (width, height) = output.mode.size();
        info!(
            "Display output: {}x{}@{} on CRTC {:?} (index {}), {} planes",
            width,
            height,
            output.mode.vrefresh(),
            output.crtc,
            output.crtc_index,
            planes.len()
        );

        Ok(Self {
            card,
            output,
            surfaces: SurfaceTable::new(planes),
        })
    }

    pub fn output(&self) -> &DisplayOutput {
        &self.output
    }

    pub fn surfaces(&self) -> &SurfaceTable {
        &self.surfaces
    }

    pub fn surfaces_mut(&mut self) -> &mut SurfaceTable {
        &mut self.surfaces
    }

    /// Assign configured stacking orders to the discovered planes.
    pub fn apply_stacking(&mut self, zpos: &[u64]) {
        for (index, &z) in zpos.iter().enumerate() {
            if let Some(s) = self.surfaces.get_mut(index) {
                s.zpos = z;
            }
        }
    }

    /// Build and submit one atomic request covering the whole display.
    ///
    /// With `mode_set` the request additionally binds the connector to the
    /// CRTC and programs the chosen mode; this is required once before the
    /// first plane-only commit and allowed to change the display timing.
    pub fn commit(&mut self, mode_set: bool) -> Result<(), CompositorError> {
        let mut req = AtomicModeReq::new();

        if mode_set {
            // Connector/CRTC property sets are only consulted here, so
            // they are resolved per call rather than cached.
            let conn_props = properties::load_properties(&self.card, self.output.connector)?;
            req.add_property(
                self.output.connector,
                conn_props.require("CRTC_ID")?,
                property::Value::CRTC(Some(self.output.crtc)),
            );

            let crtc_props = properties::load_properties(&self.card, self.output.crtc)?;
            let blob = self
                .card
                .create_property_blob(&self.output.mode)
                .map_err(CompositorError::ModeBlob)?;
            req.add_property(self.output.crtc, crtc_props.require("MODE_ID")?, blob);
            req.add_property(
                self.output.crtc,
                crtc_props.require("ACTIVE")?,
                property::Value::Boolean(true),
            );
        }

        let (width, height) = self.output.mode.size();
        for (index, s) in self.surfaces.iter().enumerate() {
            if !s.enabled {
                continue;
            }
            let Some(fb) = s.fb else { continue };
            let Some(fb) = NonZeroU32::new(fb) else {
                warn!("plane {index}: ignoring invalid framebuffer id 0");
                continue;
            };

            for (name, value) in plane_updates(fb, self.output.crtc, width, height, s.zpos, index == 0)
            {
                match s.props.get(name) {
                    Some(prop) => {
                        req.add_property(s.handle, prop, value);
                    }
                    // zpos is optional; a plane without it keeps the
                    // device's default ordering.
                    None if name == "zpos" => {
                        debug!("plane {index} has no zpos property");
                    }
                    None => {
                        return Err(CompositorError::UnknownProperty {
                            name: name.to_string(),
                        })
                    }
                }
            }
        }

        let flags = if mode_set {
            AtomicCommitFlags::ALLOW_MODESET
        } else {
            AtomicCommitFlags::empty()
        };
        self.card
            .atomic_commit(flags, req)
            .map_err(CompositorError::Commit)
    }
}

/// Property updates one enabled plane contributes to a commit, in order.
///
/// The source rectangle is in 16.16 fixed point and covers the full mode;
/// the destination is identical, so planes are never scaled. The base
/// plane (index 0) omits zpos and relies on the device's default ordering.
fn plane_updates(
    fb: NonZeroU32,
    crtc: crtc::Handle,
    width: u16,
    height: u16,
    zpos: u64,
    base: bool,
) -> Vec<(&'static str, property::Value<'static>)> {
    let mut updates = vec![
        (
            "FB_ID",
            property::Value::Framebuffer(Some(framebuffer::Handle::from(fb))),
        ),
        ("CRTC_ID", property::Value::CRTC(Some(crtc))),
        ("SRC_X", property::Value::UnsignedRange(0)),
        ("SRC_Y", property::Value::UnsignedRange(0)),
        ("SRC_W", property::Value::UnsignedRange((width as u64) << 16)),
        ("SRC_H", property::Value::UnsignedRange((height as u64) << 16)),
        ("CRTC_X", property::Value::SignedRange(0)),
        ("CRTC_Y", property::Value::SignedRange(0)),
        ("CRTC_W", property::Value::UnsignedRange(width as u64)),
        ("CRTC_H", property::Value::UnsignedRange(height as u64)),
    ];
    if !base {
        updates.push(("zpos", property::Value::UnsignedRange(zpos)));
    }
    updates
}
