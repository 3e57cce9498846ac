use crate::error::CaptureError;

/// Requested capture format: an ideal target and a hard floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub fps: u32,
    pub min_fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            min_width: 640,
            min_height: 480,
            fps: 30,
            min_fps: 15,
        }
    }
}

/// Format a device actually delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureConstraints {
    /// Check a format offered by a device against the floor.
    pub fn accept(&self, offered: NegotiatedFormat) -> Result<NegotiatedFormat, CaptureError> {
        if offered.width < self.min_width || offered.height < self.min_height {
            return Err(CaptureError::Overconstrained(format!(
                "resolution {}x{} below minimum {}x{}",
                offered.width, offered.height, self.min_width, self.min_height
            )));
        }
        if offered.fps < self.min_fps {
            return Err(CaptureError::Overconstrained(format!(
                "frame rate {} below minimum {}",
                offered.fps, self.min_fps
            )));
        }
        Ok(offered)
    }

    /// Best format for a device whose capabilities top out at `max`.
    pub fn negotiate(&self, max: NegotiatedFormat) -> Result<NegotiatedFormat, CaptureError> {
        self.accept(NegotiatedFormat {
            width: self.width.min(max.width),
            height: self.height.min(max.height),
            fps: self.fps.min(max.fps),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_caps_to_device_maximum() {
        let constraints = CaptureConstraints::default();
        let format = constraints
            .negotiate(NegotiatedFormat {
                width: 1920,
                height: 1080,
                fps: 60,
            })
            .unwrap();
        assert_eq!((format.width, format.height, format.fps), (1280, 720, 30));

        let format = constraints
            .negotiate(NegotiatedFormat {
                width: 800,
                height: 600,
                fps: 20,
            })
            .unwrap();
        assert_eq!((format.width, format.height, format.fps), (800, 600, 20));
    }

    #[test]
    fn negotiate_rejects_below_floor() {
        let constraints = CaptureConstraints::default();
        let err = constraints
            .negotiate(NegotiatedFormat {
                width: 320,
                height: 240,
                fps: 30,
            })
            .unwrap_err();
        assert_eq!(err.code(), "overconstrained");

        let err = constraints
            .negotiate(NegotiatedFormat {
                width: 1280,
                height: 720,
                fps: 10,
            })
            .unwrap_err();
        assert!(err.to_string().contains("frame rate 10"));
    }
}
