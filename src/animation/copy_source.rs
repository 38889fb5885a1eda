use crate::pixel_buffer::PixelGrid;

/// Repaints a fixed snapshot every tick. Hosts an overlay whose own base
/// animation has gone away, and ends once there is no overlay left to host.
#[derive(Debug)]
pub struct CopySource {
    snapshot: Vec<u32>,
}

impl CopySource {
    pub fn new(grid: &PixelGrid) -> Self {
        CopySource {
            snapshot: grid.copy_pixels(),
        }
    }

    pub fn run(&mut self, grid: &mut PixelGrid) -> bool {
        grid.copy_from(&self.snapshot);
        false
    }
}
