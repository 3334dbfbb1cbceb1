// Rationale: frames never leave the process except as an encoded request image.
use live_detect::Frame;
use serde::Serialize;

#[derive(Serialize)]
struct Wrapper {
    frame: Frame,
}

fn main() {}
