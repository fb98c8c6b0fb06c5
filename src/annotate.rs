//! In-place frame annotation.
//!
//! Every stage-one detection gets a corner-accented box and a `class conf`
//! label. Accepted plates are drawn afterwards, so they sit on top of the
//! detection layer. Text uses a built-in 5x7 bitmap font.

use image::{Rgb, RgbImage};
use serde::Serialize;

use crate::detect::Detection;
use crate::geometry::BoundingBox;

pub const DETECTION_BOX: Rgb<u8> = Rgb([255, 0, 255]);
pub const DETECTION_CORNER: Rgb<u8> = Rgb([0, 255, 0]);
pub const PLATE_BOX: Rgb<u8> = Rgb([255, 200, 0]);
pub const PLATE_CORNER: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const CORNER_LEN: i32 = 30;
const CORNER_THICKNESS: i32 = 5;
const LABEL_SCALE: i32 = 2;
const LABEL_PADDING: i32 = 6;
/// Labels never start above this row so the text box stays on screen.
const LABEL_MIN_Y: i32 = 35;

/// A box and label drawn onto a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
}

pub fn detection_label(det: &Detection) -> String {
    format!("{} {:.2}", det.class, det.confidence)
}

pub fn annotate_detection(image: &mut RgbImage, det: &Detection) -> Annotation {
    let label = detection_label(det);
    draw_labeled_box(image, &det.bbox, &label, DETECTION_BOX, DETECTION_CORNER);
    Annotation {
        bbox: det.bbox,
        label,
    }
}

/// Draw an accepted plate at its frame-absolute position.
pub fn annotate_plate(image: &mut RgbImage, bbox: &BoundingBox, text: &str) -> Annotation {
    draw_labeled_box(image, bbox, text, PLATE_BOX, PLATE_CORNER);
    Annotation {
        bbox: *bbox,
        label: text.to_string(),
    }
}

fn draw_labeled_box(
    image: &mut RgbImage,
    bbox: &BoundingBox,
    label: &str,
    box_color: Rgb<u8>,
    corner_color: Rgb<u8>,
) {
    corner_rect(image, bbox, box_color, corner_color);
    put_text_rect(
        image,
        label,
        bbox.x1.max(0),
        bbox.y1.max(LABEL_MIN_Y),
        box_color,
    );
}

/// One-pixel outline with thick accents on the four corners.
pub fn corner_rect(image: &mut RgbImage, bbox: &BoundingBox, outline: Rgb<u8>, corner: Rgb<u8>) {
    let BoundingBox { x1, y1, x2, y2 } = *bbox;
    draw_hline(image, x1, x2, y1, outline);
    draw_hline(image, x1, x2, y2, outline);
    draw_vline(image, x1, y1, y2, outline);
    draw_vline(image, x2, y1, y2, outline);

    let len_x = CORNER_LEN.min(bbox.width().max(0));
    let len_y = CORNER_LEN.min(bbox.height().max(0));
    let t = CORNER_THICKNESS;
    // top-left, top-right, bottom-left, bottom-right
    fill_rect(image, x1, y1, x1 + len_x, y1 + t, corner);
    fill_rect(image, x1, y1, x1 + t, y1 + len_y, corner);
    fill_rect(image, x2 - len_x, y1, x2, y1 + t, corner);
    fill_rect(image, x2 - t, y1, x2, y1 + len_y, corner);
    fill_rect(image, x1, y2 - t, x1 + len_x, y2, corner);
    fill_rect(image, x1, y2 - len_y, x1 + t, y2, corner);
    fill_rect(image, x2 - len_x, y2 - t, x2, y2, corner);
    fill_rect(image, x2 - t, y2 - len_y, x2, y2, corner);
}

/// Text on a filled background. `(x, y)` is the bottom-left of the text.
pub fn put_text_rect(image: &mut RgbImage, text: &str, x: i32, y: i32, background: Rgb<u8>) {
    let glyph_w = 6 * LABEL_SCALE;
    let glyph_h = 7 * LABEL_SCALE;
    let text_w = text.chars().count() as i32 * glyph_w;
    fill_rect(
        image,
        x - LABEL_PADDING,
        y - glyph_h - LABEL_PADDING,
        x + text_w + LABEL_PADDING,
        y + LABEL_PADDING,
        background,
    );
    draw_text(image, text, x, y - glyph_h, LABEL_TEXT);
}

/// Fill `[x1, x2) x [y1, y2)`, clipped to the image.
pub fn fill_rect(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    let w = image.width() as i32;
    let h = image.height() as i32;
    let (x1, x2) = (x1.clamp(0, w), x2.clamp(0, w));
    let (y1, y2) = (y1.clamp(0, h), y2.clamp(0, h));
    for y in y1..y2 {
        for x in x1..x2 {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_hline(image: &mut RgbImage, x1: i32, x2: i32, y: i32, color: Rgb<u8>) {
    fill_rect(image, x1, y, x2 + 1, y + 1, color);
}

fn draw_vline(image: &mut RgbImage, x: i32, y1: i32, y2: i32, color: Rgb<u8>) {
    fill_rect(image, x, y1, x + 1, y2 + 1, color);
}

fn draw_text(image: &mut RgbImage, text: &str, mut x: i32, top: i32, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col * LABEL_SCALE;
                        let py = top + row as i32 * LABEL_SCALE;
                        fill_rect(image, px, py, px + LABEL_SCALE, py + LABEL_SCALE, color);
                    }
                }
            }
        }
        x += 6 * LABEL_SCALE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ObjectClass;

    #[test]
    fn detection_label_has_class_and_confidence() {
        let det = Detection {
            class: ObjectClass::Rider,
            bbox: BoundingBox::new(0, 0, 10, 10),
            confidence: 0.9,
        };
        assert_eq!(detection_label(&det), "rider 0.90");
    }

    #[test]
    fn corner_rect_paints_outline_and_corners() {
        let mut image = RgbImage::new(200, 200);
        corner_rect(
            &mut image,
            &BoundingBox::new(50, 50, 150, 150),
            DETECTION_BOX,
            DETECTION_CORNER,
        );
        assert_eq!(image.get_pixel(52, 52), &DETECTION_CORNER);
        assert_eq!(image.get_pixel(100, 50), &DETECTION_BOX);
        assert_eq!(image.get_pixel(100, 100), &Rgb([0, 0, 0]));
    }

    #[test]
    fn drawing_outside_the_frame_is_clipped() {
        let mut image = RgbImage::new(20, 20);
        corner_rect(
            &mut image,
            &BoundingBox::new(-50, -50, 400, 400),
            DETECTION_BOX,
            DETECTION_CORNER,
        );
        put_text_rect(&mut image, "WP1234", 15, 5, PLATE_BOX);
    }

    #[test]
    fn plate_annotation_records_position() {
        let mut image = RgbImage::new(640, 480);
        let bbox = BoundingBox::new(5, 150, 45, 170);
        let ann = annotate_plate(&mut image, &bbox, "WP1234");
        assert_eq!(ann.bbox, bbox);
        assert_eq!(ann.label, "WP1234");
        assert_eq!(image.get_pixel(44, 160), &PLATE_CORNER);
        assert_eq!(image.get_pixel(45, 160), &PLATE_BOX);
    }
}
