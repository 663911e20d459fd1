//! Affine warping of packed RGBA images

use crate::domain::transform::AffineTransform;

/// Fill for canvas pixels that map outside the source
const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

/// Read-only view of a packed RGBA plane with an arbitrary row stride
#[derive(Debug, Clone, Copy)]
pub struct RgbaPlane<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

/// Writable view of a packed RGBA plane
#[derive(Debug)]
pub struct RgbaPlaneMut<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

impl RgbaPlane<'_> {
    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * 4;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + 4]);
        px
    }

    /// Bilinear sample at continuous pixel coordinates, edges clamped
    fn sample_bilinear(&self, fx: f64, fy: f64) -> [u8; 4] {
        let x0 = fx.floor() as i64;
        let y0 = fy.floor() as i64;
        let tx = (fx - x0 as f64) as f32;
        let ty = (fy - y0 as f64) as f32;

        let clamp_x = |x: i64| x.clamp(0, self.width as i64 - 1) as u32;
        let clamp_y = |y: i64| y.clamp(0, self.height as i64 - 1) as u32;

        let p00 = self.pixel(clamp_x(x0), clamp_y(y0));
        let p10 = self.pixel(clamp_x(x0 + 1), clamp_y(y0));
        let p01 = self.pixel(clamp_x(x0), clamp_y(y0 + 1));
        let p11 = self.pixel(clamp_x(x0 + 1), clamp_y(y0 + 1));

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

        let mut out = [0u8; 4];
        for (i, channel) in out.iter_mut().enumerate() {
            let top = lerp(p00[i] as f32, p10[i] as f32, tx);
            let bottom = lerp(p01[i] as f32, p11[i] as f32, tx);
            *channel = lerp(top, bottom, ty).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

/// Rasterise `source` through `transform` into `canvas`.
///
/// Each canvas pixel centre is mapped back through the inverse transform and
/// sampled bilinearly. Right-angle rotations and whole-pixel translations land
/// on source pixel centres, so they copy pixels exactly.
pub fn warp_rgba(source: &RgbaPlane<'_>, canvas: &mut RgbaPlaneMut<'_>, transform: &AffineTransform) {
    let Some(inverse) = transform.inverse() else {
        fill(canvas, BACKGROUND);
        return;
    };

    let (width, height) = (source.width as f64, source.height as f64);

    for oy in 0..canvas.height {
        let row = oy as usize * canvas.stride;
        for ox in 0..canvas.width {
            let (sx, sy) = inverse.apply(ox as f64 + 0.5, oy as f64 + 0.5);
            let px = if sx < 0.0 || sy < 0.0 || sx > width || sy > height {
                BACKGROUND
            } else {
                source.sample_bilinear(sx - 0.5, sy - 0.5)
            };
            let offset = row + ox as usize * 4;
            canvas.data[offset..offset + 4].copy_from_slice(&px);
        }
    }
}

fn fill(canvas: &mut RgbaPlaneMut<'_>, px: [u8; 4]) {
    for oy in 0..canvas.height as usize {
        let row = oy * canvas.stride;
        for chunk in canvas.data[row..row + canvas.width as usize * 4].chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }
}
