//! Status overlay drawn onto outgoing frames

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::classifier::ClassificationResult;
use crate::detector::FaceRegion;
use crate::landmarks::{anchors, LandmarkSet};
use crate::status::StatusRecord;

const HEADER_HEIGHT: u32 = 48;
const TITLE: &str = "DRIVER MONITORING SYSTEM";
const TITLE_X: u32 = 16;
const BADGE_Y: u32 = 10;
const BADGE_HEIGHT: u32 = 28;
const BADGE_PAD: u32 = 6;
const BADGE_GAP: u32 = 8;

const HEADER: Rgb<u8> = Rgb([25, 25, 25]);
const INACTIVE: Rgb<u8> = Rgb([60, 60, 60]);
const ACTIVE: Rgb<u8> = Rgb([255, 160, 30]);
const TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const FACE_BOX: Rgb<u8> = Rgb([0, 220, 0]);
const DROWSY_TEXT: Rgb<u8> = Rgb([60, 120, 255]);
const ANCHOR: Rgb<u8> = Rgb([0, 200, 255]);

/// Copy of `frame` with the header, face box, face labels and pose anchors
/// drawn.
///
/// Badges, left to right: face detected, drowsy, awake, emotion.
pub fn annotate(
    frame: &RgbImage,
    record: &StatusRecord,
    face: Option<&FaceRegion>,
    landmarks: Option<&LandmarkSet>,
) -> RgbImage {
    let mut canvas = frame.clone();
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return canvas;
    }

    filled(&mut canvas, 0, 0, width, HEADER_HEIGHT.min(height), HEADER);
    draw_text(&mut canvas, TITLE_X, text_top(HEADER_HEIGHT), TITLE, TEXT);

    let emotion = format!("EMOTION: {}", record.emotion.label);
    let badges = [
        ("FACE DETECTED", record.face_detected),
        ("DROWSY", record.is_drowsy()),
        ("AWAKE", !record.is_drowsy()),
        (emotion.as_str(), record.emotion.confidence > 0.0),
    ];
    let mut x = badges_start();
    for (label, active) in badges {
        x = draw_badge(&mut canvas, x, label, active);
    }

    if let Some(face) = face.filter(|f| f.valid) {
        let rect = Rect::at(face.x as i32, face.y as i32).of_size(face.width, face.height);
        draw_hollow_rect_mut(&mut canvas, rect, FACE_BOX);
        if record.face_detected {
            let line = GLYPH_HEIGHT + 4;
            let top = face.y.saturating_sub(2 * line);
            draw_text(&mut canvas, face.x, top, &caption(&record.emotion), FACE_BOX);
            draw_text(&mut canvas, face.x, top + line, &caption(&record.drowsiness), DROWSY_TEXT);
        }
    }

    if let Some(landmarks) = landmarks {
        for index in anchors::POSE {
            if let Some(p) = landmarks.pixel(index, width, height) {
                if p.x.is_finite() && p.y.is_finite() {
                    draw_filled_circle_mut(&mut canvas, (p.x as i32, p.y as i32), 3, ANCHOR);
                }
            }
        }
    }

    canvas
}

fn caption(result: &ClassificationResult) -> String {
    format!("{} {:.2}", result.label, result.confidence)
}

fn badges_start() -> u32 {
    TITLE_X + text_width(TITLE) + 2 * BADGE_GAP
}

fn badge_width(label: &str) -> u32 {
    text_width(label) + 2 * BADGE_PAD
}

/// Draw one badge at `x`; returns where the next one starts
fn draw_badge(canvas: &mut RgbImage, x: u32, label: &str, active: bool) -> u32 {
    let color = if active { ACTIVE } else { INACTIVE };
    let width = badge_width(label);
    filled(canvas, x, BADGE_Y, width, BADGE_HEIGHT, color);
    draw_text(canvas, x + BADGE_PAD, BADGE_Y + text_top(BADGE_HEIGHT), label, TEXT);
    x + width + BADGE_GAP
}

/// Filled rectangle clipped to the canvas; nothing is drawn if it falls outside
fn filled(canvas: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let w = w.min(canvas.width().saturating_sub(x));
    let h = h.min(canvas.height().saturating_sub(y));
    if w > 0 && h > 0 {
        draw_filled_rect_mut(canvas, Rect::at(x as i32, y as i32).of_size(w, h), color);
    }
}

// 3x5 bitmap font, each glyph drawn at GLYPH_SCALE. Rows are 3-bit masks,
// the high bit is the leftmost column.
const GLYPH_SCALE: u32 = 2;
const GLYPH_HEIGHT: u32 = 5 * GLYPH_SCALE;
const GLYPH_ADVANCE: u32 = 4 * GLYPH_SCALE;

/// Offset that centers a line of text vertically in `box_height`
fn text_top(box_height: u32) -> u32 {
    box_height.saturating_sub(GLYPH_HEIGHT) / 2
}

fn text_width(text: &str) -> u32 {
    (text.chars().count() as u32 * GLYPH_ADVANCE).saturating_sub(GLYPH_SCALE)
}

fn draw_text(canvas: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        let left = x + i as u32 * GLYPH_ADVANCE;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) != 0 {
                    filled(
                        canvas,
                        left + col * GLYPH_SCALE,
                        y + row as u32 * GLYPH_SCALE,
                        GLYPH_SCALE,
                        GLYPH_SCALE,
                        color,
                    );
                }
            }
        }
    }
}

fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        'A' => [2, 5, 7, 5, 5],
        'B' => [6, 5, 6, 5, 6],
        'C' => [3, 4, 4, 4, 3],
        'D' => [6, 5, 5, 5, 6],
        'E' => [7, 4, 6, 4, 7],
        'F' => [7, 4, 6, 4, 4],
        'G' => [3, 4, 5, 5, 3],
        'H' => [5, 5, 7, 5, 5],
        'I' => [7, 2, 2, 2, 7],
        'J' => [1, 1, 1, 5, 2],
        'K' => [5, 5, 6, 5, 5],
        'L' => [4, 4, 4, 4, 7],
        'M' => [5, 7, 7, 5, 5],
        'N' => [6, 5, 5, 5, 5],
        'O' => [2, 5, 5, 5, 2],
        'P' => [6, 5, 6, 4, 4],
        'Q' => [2, 5, 5, 6, 3],
        'R' => [6, 5, 6, 5, 5],
        'S' => [3, 4, 2, 1, 6],
        'T' => [7, 2, 2, 2, 2],
        'U' => [5, 5, 5, 5, 7],
        'V' => [5, 5, 5, 5, 2],
        'W' => [5, 5, 7, 7, 5],
        'X' => [5, 5, 2, 5, 5],
        'Y' => [5, 5, 2, 2, 2],
        'Z' => [7, 1, 2, 4, 7],
        '0' => [7, 5, 5, 5, 7],
        '1' => [2, 6, 2, 2, 7],
        '2' => [7, 1, 7, 4, 7],
        '3' => [7, 1, 7, 1, 7],
        '4' => [5, 5, 7, 1, 1],
        '5' => [7, 4, 7, 1, 7],
        '6' => [7, 4, 7, 5, 7],
        '7' => [7, 1, 2, 4, 4],
        '8' => [7, 5, 7, 5, 7],
        '9' => [7, 5, 7, 1, 7],
        ' ' => [0, 0, 0, 0, 0],
        ':' => [0, 2, 0, 2, 0],
        '.' => [0, 0, 0, 0, 2],
        '%' => [5, 1, 2, 4, 5],
        // dashes, including the no-label sentinel
        '-' | '—' | '–' => [0, 0, 7, 0, 0],
        _ => [7, 1, 2, 0, 2],
    }
}
