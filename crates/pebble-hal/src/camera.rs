//! Camera frames captured by the robot's head camera.

/// A greyscale frame from the head camera, one byte per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Raw pixel data.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// Flip the frame left-to-right so it reads like a mirror when shown on
    /// the face display.
    ///
    /// Frames whose buffer does not match `width * height` are returned
    /// unchanged.
    pub fn mirrored(mut self) -> Self {
        let width = self.width as usize;
        if width == 0 || self.data.len() != width * self.height as usize {
            return self;
        }
        for row in self.data.chunks_mut(width) {
            row.reverse();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrored_reverses_each_row() {
        let frame = CameraFrame {
            width: 3,
            height: 2,
            data: vec![1, 2, 3, 4, 5, 6],
        };
        let flipped = frame.mirrored();
        assert_eq!(flipped.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn mirrored_ignores_malformed_buffer() {
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: vec![9; 3],
        };
        assert_eq!(frame.clone().mirrored(), frame);
    }
}
