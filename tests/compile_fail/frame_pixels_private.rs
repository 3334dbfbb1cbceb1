// Rationale: a queued frame is read-only; pixels are reachable only through `pixels()`.
use live_detect::Frame;

fn main() {
    let mut frame = Frame::new(0, 0, vec![0; 3], 1, 1);
    frame.pixels[0] = 255;
}
