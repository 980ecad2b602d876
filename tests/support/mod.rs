//! Test doubles shared by the integration suites.

use std::{
    cell::Cell,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use mapcap::{
    CameraPose, Clock, FrameRgba, FrameSink, LngLat, MapRenderer, MapcapResult, SinkKind,
};

pub struct MockRenderer {
    pub pose: CameraPose,
    pub width: u32,
    pub height: u32,
    pub fill: u8,
    /// Number of `assets_ready` polls before readiness is reported.
    pub assets_ready_after: u32,
    asset_polls: Cell<u32>,
    pub repaints: u32,
    /// Camera pose at the moment of each frame-buffer read, in read order.
    pub poses_at_capture: Vec<CameraPose>,
    pub resizes: Vec<(u32, u32)>,
}

impl MockRenderer {
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
            fill: 0x7f,
            assets_ready_after: 0,
            asset_polls: Cell::new(0),
            repaints: 0,
            poses_at_capture: Vec::new(),
            resizes: Vec::new(),
        }
    }
}

impl MapRenderer for MockRenderer {
    fn request_repaint(&mut self) {
        self.repaints += 1;
    }

    fn wait_render_complete(&mut self) -> MapcapResult<()> {
        Ok(())
    }

    fn assets_ready(&self) -> bool {
        let polls = self.asset_polls.get() + 1;
        self.asset_polls.set(polls);
        polls > self.assets_ready_after
    }

    fn read_frame_buffer(
        &mut self,
        _x: u32,
        _y: u32,
        width: u32,
        height: u32,
    ) -> MapcapResult<FrameRgba> {
        self.poses_at_capture.push(self.pose);
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

    fn ease_to(&mut self, pose: &CameraPose, _duration_ms: f64) -> MapcapResult<()> {
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

/// A driven clock that records every freeze instant.
#[derive(Default)]
pub struct RecordingClock {
    base_ms: f64,
    frozen_at: Option<f64>,
    pub freezes: Vec<f64>,
}

impl RecordingClock {
    pub fn is_frozen(&self) -> bool {
        self.frozen_at.is_some()
    }
}

impl Clock for RecordingClock {
    fn freeze(&mut self, t_ms: f64) {
        self.frozen_at = Some(t_ms);
        self.freezes.push(t_ms);
    }

    fn unfreeze(&mut self) {
        self.frozen_at = None;
    }

    fn now(&self) -> f64 {
        self.frozen_at.unwrap_or(self.base_ms)
    }
}

/// Sink that keeps every pushed frame for inspection.
pub struct MockSink {
    pub kind: SinkKind,
    pub frames: Vec<Vec<u8>>,
    pub finished: bool,
    pub disposals: Arc<AtomicUsize>,
}

impl MockSink {
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            frames: Vec::new(),
            finished: false,
            disposals: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn disposal_count(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }
}

impl FrameSink for MockSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn push_frame(&mut self, frame: &FrameRgba) -> MapcapResult<()> {
        self.frames.push(frame.data.clone());
        Ok(())
    }

    fn finish(&mut self) -> MapcapResult<Vec<u8>> {
        self.finished = true;
        Ok(self.frames.concat())
    }

    fn dispose(&mut self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}
