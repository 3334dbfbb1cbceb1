// Rationale: a frame has a single owner from capture until it is dropped or processed.
use live_detect::Frame;

fn main() {
    let frame = Frame::new(0, 0, vec![0; 3], 1, 1);
    let _copy = frame.clone();
}
