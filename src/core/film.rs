//! Image buffers: the HDR input buffer handed to the environment
//! light, the sample buffer that workers accumulate radiance into, and
//! the 8-bit frame buffer the image writer consumes.

// std
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
// others
use atomic::Atomic;
// lumen
use crate::core::common::{clamp_t, Float, Spectrum};

/// Equirectangular (lat/long) HDR image, row-major, linear RGB.
pub struct HdrImageBuffer {
    pub w: usize,
    pub h: usize,
    pub data: Vec<Spectrum>,
}

impl HdrImageBuffer {
    pub fn new(w: usize, h: usize, data: Vec<Spectrum>) -> Self {
        assert_eq!(data.len(), w * h);
        HdrImageBuffer { w, h, data }
    }
}

/// Per-pixel radiance accumulator. Channels are atomics so that BDPT
/// light-subpath splats, which may land on any pixel from any worker,
/// remain race-free. The unidirectional tracer only ever writes pixels
/// inside its own tile and uses the plain overwrite path.
pub struct SampleBuffer {
    pub w: usize,
    pub h: usize,
    data: Vec<Atomic<Float>>,
}

impl SampleBuffer {
    pub fn new(w: usize, h: usize) -> Self {
        SampleBuffer {
            w,
            h,
            data: (0..w * h * 3).map(|_| Atomic::new(0.0)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn clear(&self) {
        for c in &self.data {
            c.store(0.0, Ordering::Relaxed);
        }
    }

    /// Overwrite pixel `(x, y)` with an averaged estimate. Non-finite
    /// values are dropped.
    pub fn update_pixel(&self, s: &Spectrum, x: usize, y: usize) {
        if !s.is_finite() {
            return;
        }
        let base: usize = (y * self.w + x) * 3;
        self.data[base].store(s.r, Ordering::Relaxed);
        self.data[base + 1].store(s.g, Ordering::Relaxed);
        self.data[base + 2].store(s.b, Ordering::Relaxed);
    }

    /// Atomically accumulate into pixel `(x, y)`. Non-finite values
    /// are dropped.
    pub fn update_pixel_add(&self, s: &Spectrum, x: usize, y: usize) {
        if !s.is_finite() {
            return;
        }
        let base: usize = (y * self.w + x) * 3;
        for (i, v) in [s.r, s.g, s.b].iter().enumerate() {
            let cell: &Atomic<Float> = &self.data[base + i];
            let mut old: Float = cell.load(Ordering::Relaxed);
            loop {
                match cell.compare_exchange_weak(
                    old,
                    old + v,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => old = actual,
                }
            }
        }
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> Spectrum {
        let base: usize = (y * self.w + x) * 3;
        Spectrum::new(
            self.data[base].load(Ordering::Relaxed),
            self.data[base + 1].load(Ordering::Relaxed),
            self.data[base + 2].load(Ordering::Relaxed),
        )
    }

    /// Gamma-encode the region `[x0, x1) x [y0, y1)` into the frame
    /// buffer; workers call this for their tile as it completes.
    pub fn to_color(&self, fb: &mut FrameBuffer, x0: usize, y0: usize, x1: usize, y1: usize) {
        let gamma: Float = 2.2;
        for y in y0..y1.min(self.h) {
            for x in x0..x1.min(self.w) {
                let s: Spectrum = self.get_pixel(x, y);
                fb.set_pixel(
                    x,
                    y,
                    [
                        encode_channel(s.r, gamma),
                        encode_channel(s.g, gamma),
                        encode_channel(s.b, gamma),
                        255,
                    ],
                );
            }
        }
    }

    /// Global-key Reinhard tone mapping with burn-out white, applied to
    /// the whole buffer: luminance is keyed to the log average, then
    /// compressed by `L (1 + L / wht^2) / (1 + L)`.
    pub fn tonemap(
        &self,
        fb: &mut FrameBuffer,
        gamma: Float,
        level: Float,
        key: Float,
        wht: Float,
    ) {
        let n: usize = self.w * self.h;
        if n == 0 {
            return;
        }

        let delta: Float = 1e-4;
        let mut log_sum: Float = 0.0;
        for y in 0..self.h {
            for x in 0..self.w {
                log_sum += (delta + self.get_pixel(x, y).illum()).ln();
            }
        }
        let log_avg: Float = (log_sum / n as Float).exp();
        let scale: Float = level * key / log_avg;

        for y in 0..self.h {
            for x in 0..self.w {
                let s: Spectrum = self.get_pixel(x, y);
                let lum: Float = s.illum();
                if lum <= 0.0 {
                    fb.set_pixel(x, y, [0, 0, 0, 255]);
                    continue;
                }
                let l: Float = lum * scale;
                let ld: Float = l * (1.0 + l / (wht * wht)) / (1.0 + l);
                let s: Spectrum = s * (ld / lum);
                fb.set_pixel(
                    x,
                    y,
                    [
                        encode_channel(s.r, gamma),
                        encode_channel(s.g, gamma),
                        encode_channel(s.b, gamma),
                        255,
                    ],
                );
            }
        }
    }
}

fn encode_channel(v: Float, gamma: Float) -> u8 {
    (clamp_t(v, 0.0, 1.0).powf(1.0 / gamma) * 255.0) as u8
}

/// 8-bit RGBA output image.
pub struct FrameBuffer {
    pub w: usize,
    pub h: usize,
    pub data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(w: usize, h: usize) -> Self {
        FrameBuffer {
            w,
            h,
            data: vec![0; w * h * 4],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn clear(&mut self) {
        for b in &mut self.data {
            *b = 0;
        }
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [u8; 4]) {
        let base: usize = (y * self.w + x) * 4;
        self.data[base..base + 4].copy_from_slice(&rgba);
    }

    /// Write the image as a PNG, reversing the rows so the bottom-up
    /// buffer comes out upright.
    pub fn save_image(&self, path: &Path) -> io::Result<()> {
        let mut flipped: Vec<u8> = Vec::with_capacity(self.data.len());
        for y in (0..self.h).rev() {
            let row: usize = y * self.w * 4;
            flipped.extend_from_slice(&self.data[row..row + self.w * 4]);
        }
        image::save_buffer(
            path,
            &flipped,
            self.w as u32,
            self.h as u32,
            image::RGBA(8),
        )
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Default output filename, stamped with the current local time.
pub fn timestamped_filename() -> String {
    let now = time::now();
    match time::strftime("%Y%m%d_%H%M%S", &now) {
        Ok(stamp) => format!("lumen_{}.png", stamp),
        Err(_) => String::from("lumen.png"),
    }
}
