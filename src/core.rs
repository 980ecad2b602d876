use crate::error::{MapcapError, MapcapResult};

/// Geographic coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// A full camera state. Value type: captured restore points are copies,
/// never references into live renderer state.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraPose {
    pub center: LngLat,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
}

impl CameraPose {
    /// Linear interpolation between two poses, taking the shortest path
    /// around the bearing circle.
    pub fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        fn mix(a: f64, b: f64, t: f64) -> f64 {
            a + (b - a) * t
        }

        let mut db = (b.bearing - a.bearing) % 360.0;
        if db > 180.0 {
            db -= 360.0;
        } else if db < -180.0 {
            db += 360.0;
        }

        Self {
            center: LngLat::new(
                mix(a.center.lng, b.center.lng, t),
                mix(a.center.lat, b.center.lat, t),
            ),
            zoom: mix(a.zoom, b.zoom, t),
            bearing: a.bearing + db * t,
            pitch: mix(a.pitch, b.pitch, t),
        }
    }
}

/// Geographic/zoom envelope a recording camera must stay within.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl CameraBounds {
    pub fn validate(&self) -> MapcapResult<()> {
        if self.west > self.east || self.south > self.north {
            return Err(MapcapError::validation(
                "CameraBounds rectangle is inverted (west > east or south > north)",
            ));
        }
        if self.min_zoom > self.max_zoom {
            return Err(MapcapError::validation(
                "CameraBounds min_zoom must be <= max_zoom",
            ));
        }
        Ok(())
    }

    pub fn contains(&self, pose: &CameraPose) -> bool {
        let LngLat { lng, lat } = pose.center;
        lng >= self.west
            && lng <= self.east
            && lat >= self.south
            && lat <= self.north
            && pose.zoom >= self.min_zoom
            && pose.zoom <= self.max_zoom
    }

    /// The nearest valid pose: center clamped into the rectangle, zoom
    /// clamped into [min_zoom, max_zoom]. Bearing and pitch pass through.
    pub fn clamp_pose(&self, pose: &CameraPose) -> CameraPose {
        CameraPose {
            center: LngLat::new(
                pose.center.lng.clamp(self.west, self.east),
                pose.center.lat.clamp(self.south, self.north),
            ),
            zoom: pose.zoom.clamp(self.min_zoom, self.max_zoom),
            ..*pose
        }
    }
}

/// One captured frame: RGBA8, row-major, top-down.
#[derive(Clone, Debug)]
pub struct FrameRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameRgba {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> MapcapResult<Self> {
        if data.len() != (width as usize) * (height as usize) * 4 {
            return Err(MapcapError::validation(
                "FrameRgba data length must equal width*height*4",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}
