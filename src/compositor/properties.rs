//! Display object property resolution
//!
//! The kernel assigns property ids per device at runtime, so every
//! property has to be looked up by name before it can be set. Lookups go
//! through [`PropertyMap`], built once per object from the device's
//! reported property set; plane maps are cached for the lifetime of the
//! plane record since they are consulted every frame.

use std::collections::HashMap;

use drm::control::{property, Device as ControlDevice, ResourceHandle};

use super::device::Card;
use super::CompositorError;

/// Name → handle map for one display object's property set.
#[derive(Debug, Default, Clone)]
pub struct PropertyMap {
    entries: HashMap<String, property::Handle>,
}

impl PropertyMap {
    /// Look up an optional property (e.g. zpos, which some planes lack).
    pub fn get(&self, name: &str) -> Option<property::Handle> {
        self.entries.get(name).copied()
    }

    /// Look up a property the object must expose.
    pub fn require(&self, name: &str) -> Result<property::Handle, CompositorError> {
        self.get(name).ok_or_else(|| CompositorError::UnknownProperty {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, property::Handle)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, property::Handle)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Read the full property set of `object` and resolve every name.
///
/// Names are matched exactly and case-sensitively by the consumers; the
/// kernel reports them as fixed-size C strings.
pub fn load_properties<T: ResourceHandle>(
    card: &Card,
    object: T,
) -> Result<PropertyMap, CompositorError> {
    let props = card
        .get_properties(object)
        .map_err(CompositorError::Resources)?;
    let (handles, _values) = props.as_props_and_values();

    let mut entries = HashMap::with_capacity(handles.len());
    for &handle in handles {
        let info = card.get_property(handle).map_err(CompositorError::Resources)?;
        entries.insert(info.name().to_string_lossy().into_owned(), handle);
    }
    Ok(PropertyMap { entries })
}
