use std::f32::consts::PI;

/// Single-channel floating-point image, row-major. Intensities are expected
/// in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ImagePlane {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

impl ImagePlane {
    pub fn zeros(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0);
        Self {
            data: vec![0.0; width * height],
            width,
            height,
        }
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Self {
        let mut img = Self::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                img.data[y * width + x] = f(x, y);
            }
        }
        img
    }

    pub fn from_data(data: Vec<f32>, width: usize, height: usize) -> Self {
        assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        assert!(x < self.width && y < self.height);
        self.data[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        assert!(x < self.width && y < self.height);
        self.data[y * self.width + x] = value;
    }

    /// Border-replicating integer access.
    fn get_replicated(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinear sample with replicate-border behavior outside the image.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let dx = x - x0;
        let dy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let top = self.get_replicated(x0, y0) * (1.0 - dx) + self.get_replicated(x0 + 1, y0) * dx;
        let bottom =
            self.get_replicated(x0, y0 + 1) * (1.0 - dx) + self.get_replicated(x0 + 1, y0 + 1) * dx;
        top * (1.0 - dy) + bottom * dy
    }

    /// Bilinear resize.
    pub fn resize(&self, width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0);
        if width == self.width && height == self.height {
            return self.clone();
        }
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        Self::from_fn(width, height, |x, y| {
            self.sample_bilinear((x as f32 + 0.5) * sx - 0.5, (y as f32 + 0.5) * sy - 0.5)
        })
    }

    /// Extracts a `width` x `height` subwindow centered at `(cx, cy)` and
    /// rotated by `angle` degrees, axis-aligning the output. Samples outside
    /// the image replicate the border values; a window that does not
    /// intersect the image at all yields a zero-filled patch.
    pub fn sample_rotated(&self, cx: f32, cy: f32, width: usize, height: usize, angle: f32) -> Self {
        assert!(width > 0 && height > 0);
        let rad = angle * PI / 180.0;
        let (sin, cos) = rad.sin_cos();
        let half_w = (width as f32 - 1.0) / 2.0;
        let half_h = (height as f32 - 1.0) / 2.0;

        // reject windows that have no overlap with the image
        let radius = (half_w * half_w + half_h * half_h).sqrt();
        if cx + radius < 0.0
            || cy + radius < 0.0
            || cx - radius > self.width as f32 - 1.0
            || cy - radius > self.height as f32 - 1.0
        {
            return Self::zeros(width, height);
        }

        Self::from_fn(width, height, |x, y| {
            let dx = x as f32 - half_w;
            let dy = y as f32 - half_h;
            let sx = cx + dx * cos - dy * sin;
            let sy = cy + dx * sin + dy * cos;
            self.sample_bilinear(sx, sy)
        })
    }
}

/// One video frame: the grayscale plane the filter always uses, plus
/// optional color planes for feature extractors that consume them.
#[derive(Debug, Clone)]
pub struct Frame {
    pub gray: ImagePlane,
    pub color: Option<Vec<ImagePlane>>,
}

impl Frame {
    pub fn grayscale(gray: ImagePlane) -> Self {
        Self { gray, color: None }
    }

    pub fn with_color(gray: ImagePlane, color: Vec<ImagePlane>) -> Self {
        for c in &color {
            assert_eq!(c.width(), gray.width());
            assert_eq!(c.height(), gray.height());
        }
        Self {
            gray,
            color: Some(color),
        }
    }

    pub fn width(&self) -> usize {
        self.gray.width()
    }

    pub fn height(&self) -> usize {
        self.gray.height()
    }

    pub fn resize(&self, factor: f32) -> Self {
        let width = ((self.width() as f32 * factor).round() as usize).max(1);
        let height = ((self.height() as f32 * factor).round() as usize).max(1);
        Self {
            gray: self.gray.resize(width, height),
            color: self
                .color
                .as_ref()
                .map(|planes| planes.iter().map(|p| p.resize(width, height)).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_subwindow() {
        let img = ImagePlane::from_fn(8, 8, |x, y| (x + y * 8) as f32);
        let patch = img.sample_rotated(3.5, 3.5, 8, 8, 0.0);
        for y in 0..8 {
            for x in 0..8 {
                assert!((patch.get(x, y) - img.get(x, y)).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn border_replication() {
        let img = ImagePlane::from_fn(4, 4, |x, _| x as f32);
        // window centered left of the image, overlapping the border
        let patch = img.sample_rotated(-1.0, 1.5, 4, 4, 0.0);
        // leftmost columns replicate column 0
        assert!((patch.get(0, 0) - 0.0).abs() < 1e-4);
        assert!((patch.get(1, 0) - 0.0).abs() < 1e-4);
    }

    #[test]
    fn fully_outside_window_is_zero() {
        let img = ImagePlane::from_fn(4, 4, |_, _| 1.0);
        let patch = img.sample_rotated(100.0, 100.0, 4, 4, 0.0);
        for v in patch.data() {
            assert_eq!(*v, 0.0);
        }
    }

    #[test]
    fn rotation_by_quarter_turn() {
        let img = ImagePlane::from_fn(9, 9, |x, y| if x == 6 && y == 4 { 1.0 } else { 0.0 });
        // rotating the sampling window by 90 degrees moves a bright pixel on
        // the +x axis of the source above the output center
        let patch = img.sample_rotated(4.0, 4.0, 9, 9, 90.0);
        let mut best = (0usize, 0usize);
        let mut best_v = f32::MIN;
        for y in 0..9 {
            for x in 0..9 {
                if patch.get(x, y) > best_v {
                    best_v = patch.get(x, y);
                    best = (x, y);
                }
            }
        }
        assert_eq!(best, (4, 2));
    }

    #[test]
    fn resize_preserves_constant_image() {
        let img = ImagePlane::from_fn(10, 6, |_, _| 0.25);
        let small = img.resize(5, 3);
        for v in small.data() {
            assert!((v - 0.25).abs() < 1e-5);
        }
    }
}
