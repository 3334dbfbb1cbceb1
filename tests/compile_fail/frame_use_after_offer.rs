// Rationale: offering a frame to the queue moves it; the producer keeps no handle.
use std::sync::Arc;

use live_detect::{Frame, FrameQueue, LatencyTracker};

fn main() {
    let queue = FrameQueue::new(2, Arc::new(LatencyTracker::new(8)));
    let frame = Frame::new(0, 0, vec![0; 3], 1, 1);
    queue.offer(frame);
    let _id = frame.id();
}
