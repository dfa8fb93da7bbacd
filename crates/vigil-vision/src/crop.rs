//! Face crops from grayscale frames.

use image::{imageops, GrayImage, ImageBuffer, Luma};
use vigil_core::BoundingBox;
use vigil_hw::Frame;

/// Borrowed image view over a frame's pixels.
pub type FrameView<'a> = ImageBuffer<Luma<u8>, &'a [u8]>;

/// View a frame as an image without copying. `None` if the buffer is
/// shorter than `width * height`.
pub fn frame_view(frame: &Frame) -> Option<FrameView<'_>> {
    let len = (frame.width * frame.height) as usize;
    let data = frame.data.get(..len)?;
    ImageBuffer::from_raw(frame.width, frame.height, data)
}

/// Integer pixel rectangle `(x, y, w, h)` inside a `width`×`height` frame.
///
/// With `square` set the rectangle is expanded to a square around the box
/// center before clamping. Returns `None` when nothing remains.
pub fn clamp_rect(bbox: &BoundingBox, width: u32, height: u32, square: bool) -> Option<(u32, u32, u32, u32)> {
    let (mut x1, mut y1, mut x2, mut y2) = (bbox.x1, bbox.y1, bbox.x2, bbox.y2);
    if square {
        let half = bbox.width().max(bbox.height()) / 2.0;
        let cx = (x1 + x2) / 2.0;
        let cy = (y1 + y2) / 2.0;
        (x1, y1, x2, y2) = (cx - half, cy - half, cx + half, cy + half);
    }

    let x1 = x1.round().clamp(0.0, width as f32) as u32;
    let y1 = y1.round().clamp(0.0, height as f32) as u32;
    let x2 = x2.round().clamp(0.0, width as f32) as u32;
    let y2 = y2.round().clamp(0.0, height as f32) as u32;

    (x2 > x1 && y2 > y1).then(|| (x1, y1, x2 - x1, y2 - y1))
}

/// Copy out the region under `bbox`.
pub fn face_crop(frame: &Frame, bbox: &BoundingBox, square: bool) -> Option<GrayImage> {
    let view = frame_view(frame)?;
    let (x, y, w, h) = clamp_rect(bbox, frame.width, frame.height, square)?;
    Some(imageops::crop_imm(&view, x, y, w, h).to_image())
}
