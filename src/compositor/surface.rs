//! Hardware plane table
//!
//! One entry per plane the output's CRTC can drive. The table is sized at
//! discovery and never grows or shrinks; the main loop only toggles
//! enablement and swaps framebuffer ids before each commit.

use log::trace;

use drm::control::plane;

use super::properties::PropertyMap;
use crate::protocol::ClientRegistry;

/// State of one hardware plane.
pub struct PlaneSurface {
    pub handle: plane::Handle,
    /// Latest framebuffer bound to this plane; opaque, produced by a
    /// client-side allocator.
    pub fb: Option<u32>,
    pub enabled: bool,
    /// Stacking order; only written to the device for non-base planes.
    pub zpos: u64,
    /// Cached property set, resolved once at discovery.
    pub props: PropertyMap,
}

impl PlaneSurface {
    pub fn new(handle: plane::Handle, props: PropertyMap) -> Self {
        Self {
            handle,
            fb: None,
            enabled: false,
            zpos: 0,
            props,
        }
    }
}

/// Fixed-size table of the discovered planes, indexed by plane index.
pub struct SurfaceTable {
    surfaces: Vec<PlaneSurface>,
}

impl SurfaceTable {
    pub fn new(surfaces: Vec<PlaneSurface>) -> Self {
        Self { surfaces }
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaneSurface> {
        self.surfaces.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut PlaneSurface> {
        self.surfaces.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaneSurface> {
        self.surfaces.iter()
    }

    /// Show `fb` on the plane at `index` from the next commit on.
    pub fn enable(&mut self, index: usize, fb: u32) {
        if let Some(s) = self.surfaces.get_mut(index) {
            s.fb = Some(fb);
            s.enabled = true;
        }
    }

    /// Take the plane at `index` out of the commit and drop its
    /// framebuffer binding, so a later re-enable cannot show stale
    /// content from a previous client.
    pub fn disable(&mut self, index: usize) {
        if let Some(s) = self.surfaces.get_mut(index) {
            s.fb = None;
            s.enabled = false;
        }
    }

    /// Fold the client registry into the plane table, one mapping entry
    /// per client identity.
    ///
    /// A disconnected slot disables its plane. A pending submission
    /// enables the plane with the new framebuffer and consumes the
    /// pending value. A connected client with nothing new this cycle
    /// leaves its plane untouched: enablement tracks connectedness, not
    /// buffer freshness, so the last content persists until hang-up.
    pub fn sync_from_registry(&mut self, registry: &mut ClientRegistry, mapping: &[usize]) {
        for (client, &plane_index) in mapping.iter().enumerate() {
            if !registry.is_connected(client) {
                self.disable(plane_index);
                continue;
            }
            if let Some(fb) = registry.take_pending(client) {
                trace!("client {client}: fb {fb} -> plane {plane_index}");
                self.enable(plane_index, fb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn table(n: usize) -> SurfaceTable {
        let surfaces = (1..=n as u32)
            .map(|id| {
                PlaneSurface::new(
                    plane::Handle::from(NonZeroU32::new(id).unwrap()),
                    PropertyMap::default(),
                )
            })
            .collect();
        SurfaceTable::new(surfaces)
    }

    #[test]
    fn enable_and_disable_are_independent() {
        let mut surfaces = table(3);
        surfaces.enable(0, 5);
        surfaces.enable(2, 9);
        surfaces.disable(2);

        assert!(surfaces.get(0).unwrap().enabled);
        assert_eq!(surfaces.get(0).unwrap().fb, Some(5));
        assert!(!surfaces.get(1).unwrap().enabled);
        assert!(!surfaces.get(2).unwrap().enabled);
    }

    #[test]
    fn disable_clears_the_framebuffer_binding() {
        let mut surfaces = table(1);
        surfaces.enable(0, 5);
        surfaces.disable(0);
        assert_eq!(surfaces.get(0).unwrap().fb, None);
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let mut surfaces = table(1);
        surfaces.enable(7, 5);
        assert!(!surfaces.get(0).unwrap().enabled);
    }

    #[test]
    fn pending_submission_enables_the_mapped_plane() {
        let mut surfaces = table(2);
        let mut registry = ClientRegistry::new(2);
        registry.bind(1, mio::Token(40));
        registry.submit(1, 9);

        surfaces.sync_from_registry(&mut registry, &[0, 1]);

        assert!(!surfaces.get(0).unwrap().enabled);
        assert!(surfaces.get(1).unwrap().enabled);
        assert_eq!(surfaces.get(1).unwrap().fb, Some(9));
        // The pending value was consumed
        assert!(registry.take_pending(1).is_none());
    }

    #[test]
    fn quiet_connected_client_keeps_its_plane() {
        let mut surfaces = table(1);
        let mut registry = ClientRegistry::new(1);
        registry.bind(0, mio::Token(40));
        registry.submit(0, 7);

        surfaces.sync_from_registry(&mut registry, &[0]);
        // Next cycle: still connected, nothing new submitted
        surfaces.sync_from_registry(&mut registry, &[0]);

        assert!(surfaces.get(0).unwrap().enabled);
        assert_eq!(surfaces.get(0).unwrap().fb, Some(7));
    }

    #[test]
    fn disconnect_disables_the_mapped_plane() {
        let mut surfaces = table(2);
        let mut registry = ClientRegistry::new(2);
        registry.bind(0, mio::Token(40));
        registry.submit(0, 7);
        registry.bind(1, mio::Token(41));
        registry.submit(1, 9);

        surfaces.sync_from_registry(&mut registry, &[0, 1]);
        assert!(surfaces.get(1).unwrap().enabled);

        registry.reset(1);
        surfaces.sync_from_registry(&mut registry, &[0, 1]);

        assert!(!surfaces.get(1).unwrap().enabled);
        assert!(surfaces.get(0).unwrap().enabled);
        assert_eq!(surfaces.get(0).unwrap().fb, Some(7));
    }

    #[test]
    fn latest_submission_wins() {
        let mut surfaces = table(1);
        let mut registry = ClientRegistry::new(1);
        registry.bind(0, mio::Token(40));
        for fb in [3, 4, 5] {
            registry.submit(0, fb);
        }

        surfaces.sync_from_registry(&mut registry, &[0]);

        assert_eq!(surfaces.get(0).unwrap().fb, Some(5));
    }
}
