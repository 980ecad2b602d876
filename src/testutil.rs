//! In-crate test doubles for unit tests. Integration tests carry their own
//! copies under `tests/support/`.

use crate::{
    core::{CameraPose, FrameRgba, LngLat},
    error::MapcapResult,
    renderer::MapRenderer,
};

pub(crate) struct TestRenderer {
    pub pose: CameraPose,
    pub width: u32,
    pub height: u32,
    pub assets_ready: bool,
    pub fill: u8,
    pub repaints: u32,
    pub render_waits: u32,
    pub eases: Vec<(CameraPose, f64)>,
    pub resizes: Vec<(u32, u32)>,
}

impl TestRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pose: CameraPose {
                center: LngLat::new(13.4, 52.5),
                zoom: 11.0,
                bearing: 0.0,
                pitch: 45.0,
            },
            width,
            height,
            assets_ready: true,
            fill: 0x7f,
            repaints: 0,
            render_waits: 0,
            eases: Vec::new(),
            resizes: Vec::new(),
        }
    }
}

impl MapRenderer for TestRenderer {
    fn request_repaint(&mut self) {
        self.repaints += 1;
    }

    fn wait_render_complete(&mut self) -> MapcapResult<()> {
        self.render_waits += 1;
        Ok(())
    }

    fn assets_ready(&self) -> bool {
        self.assets_ready
    }

    fn read_frame_buffer(
        &mut self,
        _x: u32,
        _y: u32,
        width: u32,
        height: u32,
    ) -> MapcapResult<FrameRgba> {
        FrameRgba::new(
            width,
            height,
            vec![self.fill; (width as usize) * (height as usize) * 4],
        )
    }

    fn pose(&self) -> CameraPose {
        self.pose
    }

    fn set_pose(&mut self, pose: &CameraPose) {
        self.pose = *pose;
    }

    fn ease_to(&mut self, pose: &CameraPose, duration_ms: f64) -> MapcapResult<()> {
        self.eases.push((*pose, duration_ms));
        self.pose = *pose;
        Ok(())
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> MapcapResult<()> {
        self.resizes.push((width, height));
        self.width = width;
        self.height = height;
        Ok(())
    }
}
