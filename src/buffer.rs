//! Dumb-buffer allocation for CPU-rendered clients
//!
//! Kernel dumb buffers are the simplest way for a client to own pixels:
//! allocate, attach a framebuffer object, map and draw. The resulting
//! framebuffer id is what gets submitted over the protocol; the server
//! never touches the pixels.

use std::io;

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{framebuffer, Device as ControlDevice};

use crate::compositor::device::Card;

/// A CPU-mapped framebuffer backed by a kernel dumb buffer.
pub struct DumbFramebuffer {
    buffer: DumbBuffer,
    handle: framebuffer::Handle,
    width: u32,
    height: u32,
}

impl DumbFramebuffer {
    /// Allocate a `width` x `height` buffer and attach a framebuffer
    /// object to it. Only 32-bit formats are supported.
    pub fn create(card: &Card, format: DrmFourcc, width: u32, height: u32) -> io::Result<Self> {
        assert!(
            matches!(format, DrmFourcc::Argb8888 | DrmFourcc::Xrgb8888),
            "unsupported format {format}"
        );

        let buffer = card.create_dumb_buffer((width, height), format, 32)?;
        let handle = card.add_framebuffer(&buffer, 24, 32)?;

        Ok(Self {
            buffer,
            handle,
            width,
            height,
        })
    }

    /// The id submitted over the protocol.
    pub fn fb_id(&self) -> u32 {
        self.handle.into()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Fill the whole buffer with one packed color.
    pub fn fill(&mut self, card: &Card, color: u32) -> io::Result<()> {
        let pitch = self.buffer.pitch();
        let mut mapping = card.map_dumb_buffer(&mut self.buffer)?;
        let data = mapping.as_mut();
        for row in 0..self.height {
            let base = (row * pitch) as usize;
            for col in 0..self.width {
                let offset = base + (col * 4) as usize;
                data[offset..offset + 4].copy_from_slice(&color.to_ne_bytes());
            }
        }
        Ok(())
    }

    /// Draw a filled rectangle. Out-of-bounds coordinates are clamped.
    pub fn draw_rect(
        &mut self,
        card: &Card,
        color: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> io::Result<()> {
        let x_end = (x + width).min(self.width);
        let y_end = (y + height).min(self.height);
        let pitch = self.buffer.pitch();

        let mut mapping = card.map_dumb_buffer(&mut self.buffer)?;
        let data = mapping.as_mut();
        for row in y..y_end {
            let base = (row * pitch) as usize;
            for col in x..x_end {
                let offset = base + (col * 4) as usize;
                data[offset..offset + 4].copy_from_slice(&color.to_ne_bytes());
            }
        }
        Ok(())
    }
}
