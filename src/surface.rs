use std::io::Cursor;

use anyhow::Context;

use crate::{
    assets::{PreparedImage, unpremultiply_rgba8_in_place},
    composite::over,
    error::{PaperdollError, PaperdollResult},
};

/// CPU raster target: premultiplied RGBA8, row-major, tightly packed.
#[derive(Clone, Debug)]
pub struct Surface {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Premultiplied RGBA8 pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Clear to fully transparent.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Resize and clear. Reuses the allocation when it already fits.
    pub fn resize(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize * 4;
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize(len, 0);
    }

    /// Source-over draw of `image` at the origin, clipped to the surface
    /// bounds, with uniform `opacity` in 0..=1.
    pub fn draw_image(&mut self, image: &PreparedImage, opacity: f32) {
        let rows = image.height.min(self.height) as usize;
        let cols = image.width.min(self.width) as usize;
        let src_stride = image.width as usize * 4;
        let dst_stride = self.width as usize * 4;
        for row in 0..rows {
            let src = &image.rgba8_premul[row * src_stride..row * src_stride + cols * 4];
            let dst = &mut self.data[row * dst_stride..row * dst_stride + cols * 4];
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
                d.copy_from_slice(&out);
            }
        }
    }

    /// Encode the surface as a straight-alpha PNG.
    pub fn encode_png(&self) -> PaperdollResult<Vec<u8>> {
        if self.width == 0 || self.height == 0 {
            return Err(PaperdollError::validation(
                "cannot encode a zero-sized surface",
            ));
        }
        let mut straight = self.data.clone();
        unpremultiply_rgba8_in_place(&mut straight);
        let img = image::RgbaImage::from_raw(self.width, self.height, straight)
            .ok_or_else(|| PaperdollError::validation("surface buffer size mismatch"))?;
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .context("encode surface png")?;
        Ok(buf)
    }
}

/// Recycling pool for scratch preview surfaces (resize-and-reuse instead of
/// reallocating per preview).
#[derive(Debug, Default)]
pub struct SurfacePool {
    free: Vec<Surface>,
}

const POOL_CAP: usize = 4;

impl SurfacePool {
    pub fn acquire(&mut self, width: u32, height: u32) -> Surface {
        match self.free.pop() {
            Some(mut surface) => {
                surface.resize(width, height);
                surface
            }
            None => Surface::new(width, height),
        }
    }

    pub fn release(&mut self, surface: Surface) {
        if self.free.len() < POOL_CAP {
            self.free.push(surface);
        }
    }
}
