use image::{Rgb, RgbImage};

/// Frames between scene changes.
const SCENE_PERIOD: u64 = 50;

/// Deterministic moving-gradient scene for `stub://` locations.
pub(super) struct SyntheticSource {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub(super) fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub(super) fn next_image(&mut self) -> RgbImage {
        self.frame_count += 1;
        if self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count.wrapping_add(self.scene_state as u64 * 37);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let base = (x as u64 + y as u64 + shift) % 256;
            Rgb([base as u8, (base as u8).wrapping_mul(3), self.scene_state.wrapping_mul(40)])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_differ_and_repeat_deterministically() {
        let mut a = SyntheticSource::new(16, 8);
        let mut b = SyntheticSource::new(16, 8);
        let first = a.next_image();
        assert_eq!(first, b.next_image());
        assert_ne!(first, a.next_image());
    }
}
