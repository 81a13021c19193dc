/// Oriented bounding box: center, size and rotation angle in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RotatedBBox {
    pub cx: f32,
    pub cy: f32,
    pub width: f32,
    pub height: f32,
    pub angle: f32,
}

impl RotatedBBox {
    pub fn new(cx: f32, cy: f32, width: f32, height: f32, angle: f32) -> Self {
        Self {
            cx,
            cy,
            width,
            height,
            angle,
        }
    }

    /// Axis-aligned box from its top-left corner.
    pub fn from_tlwh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            cx: x + width / 2.0,
            cy: y + height / 2.0,
            width,
            height,
            angle: 0.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Scales center and size by `factor` (coordinate-space change, e.g.
    /// frame downscaling).
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            cx: self.cx * factor,
            cy: self.cy * factor,
            width: self.width * factor,
            height: self.height * factor,
            angle: self.angle,
        }
    }

    /// Allows comparing boxes in tests
    ///
    pub fn almost_same(&self, other: &Self, eps: f32) -> bool {
        (self.cx - other.cx).abs() < eps
            && (self.cy - other.cy).abs() < eps
            && (self.width - other.width).abs() < eps
            && (self.height - other.height).abs() < eps
            && (self.angle - other.angle).abs() < eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlwh_center() {
        let b = RotatedBBox::from_tlwh(10.0, 20.0, 4.0, 6.0);
        assert!(b.almost_same(&RotatedBBox::new(12.0, 23.0, 4.0, 6.0, 0.0), 1e-6));
    }

    #[test]
    fn scaling() {
        let b = RotatedBBox::new(10.0, 10.0, 4.0, 4.0, 15.0);
        let s = b.scale(0.5);
        assert!(s.almost_same(&RotatedBBox::new(5.0, 5.0, 2.0, 2.0, 15.0), 1e-6));
    }
}
