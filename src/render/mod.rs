//! Detection overlays for operator display and report screenshots.

mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{BBox, Detection};

pub const DEFECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const NOMINAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

pub const BOX_THICKNESS: u32 = 2;
pub const DEFAULT_LABEL_SCALE: u32 = 2;

const HEATMAP_MIN_ALPHA: f32 = 0.1;
const HEATMAP_MAX_ALPHA: f32 = 0.5;

/// Baseline offsets: the object label sits above the box, the condition label
/// below it.
const LABEL_ABOVE_BASELINE: i32 = 10;
const LABEL_BELOW_BASELINE: i32 = 20;

#[derive(Clone, Debug)]
pub struct AnnotationRenderer {
    label_scale: u32,
}

impl Default for AnnotationRenderer {
    fn default() -> Self {
        Self {
            label_scale: DEFAULT_LABEL_SCALE,
        }
    }
}

impl AnnotationRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Font pixel size multiplier (minimum 1).
    pub fn with_label_scale(mut self, scale: u32) -> Self {
        self.label_scale = scale.max(1);
        self
    }

    pub fn color_for(detection: &Detection) -> Rgb<u8> {
        if detection.is_defect() {
            DEFECT_COLOR
        } else {
            NOMINAL_COLOR
        }
    }

    /// Draw `detections` onto a copy of `image`. The input is never modified.
    pub fn draw(&self, image: &RgbImage, detections: &[Detection], draw_heatmap: bool) -> RgbImage {
        let mut canvas = image.clone();
        for detection in detections {
            let color = Self::color_for(detection);
            draw_box(&mut canvas, detection.bbox, color);

            let glyph_height = (font::GLYPH_HEIGHT * self.label_scale) as i32;
            let object_label = format!(
                "{} ({:.2})",
                detection.object_class, detection.object_confidence
            );
            let defect_label = format!(
                "{} ({:.2})",
                detection.defect_class, detection.defect_confidence
            );
            let image_width = canvas.width();
            font::draw_text(
                &mut canvas,
                self.label_x(detection.bbox.x1, &object_label, image_width),
                detection.bbox.y1 - LABEL_ABOVE_BASELINE - glyph_height,
                &object_label,
                color,
                self.label_scale,
            );
            font::draw_text(
                &mut canvas,
                self.label_x(detection.bbox.x1, &defect_label, image_width),
                detection.bbox.y2 + LABEL_BELOW_BASELINE - glyph_height,
                &defect_label,
                color,
                self.label_scale,
            );
        }

        if draw_heatmap {
            for detection in detections {
                let alpha = detection
                    .object_confidence
                    .clamp(HEATMAP_MIN_ALPHA, HEATMAP_MAX_ALPHA);
                blend_rect(&mut canvas, detection.bbox, Self::color_for(detection), alpha);
            }
        }
        canvas
    }

    /// Left edge for a label anchored at `anchor`, shifted left so it ends
    /// inside the image when the image is wide enough.
    fn label_x(&self, anchor: i32, text: &str, image_width: u32) -> i32 {
        let width = font::text_width(text, self.label_scale) as i32;
        anchor.min(image_width as i32 - width).max(0)
    }
}

fn draw_box(canvas: &mut RgbImage, bbox: BBox, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let (w, h) = (bbox.width(), bbox.height());
        if w <= 2 * inset || h <= 2 * inset {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset as i32, bbox.y1 + inset as i32)
            .of_size(w - 2 * inset, h - 2 * inset);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Alpha-blend `color` over the part of `bbox` inside the canvas.
fn blend_rect(canvas: &mut RgbImage, bbox: BBox, color: Rgb<u8>, alpha: f32) {
    let Some(area) = bbox.clamp_to(canvas.width(), canvas.height()) else {
        return;
    };
    for y in area.y1 as u32..area.y2 as u32 {
        for x in area.x1 as u32..area.x2 as u32 {
            let pixel = canvas.get_pixel_mut(x, y);
            for (channel, target) in pixel.0.iter_mut().zip(color.0) {
                let mixed = alpha * target as f32 + (1.0 - alpha) * *channel as f32;
                *channel = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{DefectClass, ObjectClass};

    fn detection(bbox: [i32; 4], object_conf: f32, defect: &str) -> Detection {
        Detection {
            bbox: BBox::new(bbox[0], bbox[1], bbox[2], bbox[3]).unwrap(),
            object_class: ObjectClass::from_name("vari-grip").unwrap(),
            object_confidence: object_conf,
            defect_class: DefectClass::from_name(defect).unwrap(),
            defect_confidence: 0.9,
        }
    }

    #[test]
    fn input_is_left_untouched() {
        let input = RgbImage::from_pixel(100, 100, Rgb([10, 20, 30]));
        let dets = [detection([20, 30, 60, 70], 0.9, "vari-grip_rust")];
        let out = AnnotationRenderer::new().draw(&input, &dets, true);
        assert!(input.pixels().all(|p| p.0 == [10, 20, 30]));
        assert_ne!(out, input);
    }

    #[test]
    fn box_color_follows_condition() {
        let input = RgbImage::new(100, 100);
        let renderer = AnnotationRenderer::new();

        let out = renderer.draw(&input, &[detection([20, 30, 60, 70], 0.9, "vari-grip_rust")], false);
        assert_eq!(out.get_pixel(40, 30).0, DEFECT_COLOR.0);
        assert_eq!(out.get_pixel(40, 31).0, DEFECT_COLOR.0);

        let out = renderer.draw(&input, &[detection([20, 30, 60, 70], 0.9, "vari-grip_good")], false);
        assert_eq!(out.get_pixel(20, 50).0, NOMINAL_COLOR.0);
    }

    #[test]
    fn heatmap_alpha_is_clamped() {
        let input = RgbImage::new(100, 100);
        let renderer = AnnotationRenderer::new();

        let strong = renderer.draw(&input, &[detection([20, 30, 60, 70], 0.95, "vari-grip_rust")], true);
        // Interior pixel, away from box edges and labels.
        assert_eq!(strong.get_pixel(40, 50).0, [128, 0, 0]);

        let weak = renderer.draw(&input, &[detection([20, 30, 60, 70], 0.01, "vari-grip_rust")], true);
        assert_eq!(weak.get_pixel(40, 50).0, [26, 0, 0]);

        let plain = renderer.draw(&input, &[detection([20, 30, 60, 70], 0.95, "vari-grip_rust")], false);
        assert_eq!(plain.get_pixel(40, 50).0, [0, 0, 0]);
    }

    #[test]
    fn labels_near_the_right_edge_shift_left() {
        let input = RgbImage::new(200, 100);
        let renderer = AnnotationRenderer::new().with_label_scale(1);
        let out = renderer.draw(&input, &[detection([150, 40, 190, 80], 0.9, "vari-grip_rust")], false);

        // "VARI-GRIP (0.90)" is 96 px wide at scale 1, so it starts at x = 104.
        let lit = (104..150).any(|x| (23..30).any(|y| out.get_pixel(x, y).0 == DEFECT_COLOR.0));
        assert!(lit);
        assert!((0..104).all(|x| (23..30).all(|y| out.get_pixel(x, y).0 == [0, 0, 0])));

        assert_eq!(renderer.label_x(10, "wider than the image", 50), 0);
    }

    #[test]
    fn boxes_at_the_edge_are_clipped() {
        let input = RgbImage::new(50, 50);
        let dets = [detection([0, 0, 50, 50], 0.4, "glass-insulator_good")];
        let out = AnnotationRenderer::new().draw(&input, &dets, true);
        assert_eq!(out.dimensions(), (50, 50));
    }
}
