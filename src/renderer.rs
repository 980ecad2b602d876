use crate::{
    core::{CameraPose, FrameRgba},
    error::MapcapResult,
};

/// Contract with the host map renderer. mapcap never renders tiles or glyphs
/// itself; it drives an implementation of this trait and reads pixels back.
///
/// Blocking semantics: `wait_render_complete` and `ease_to` return once the
/// corresponding host operation has finished. They are the suspension points
/// at which the capture loop and a running animation task interleave.
pub trait MapRenderer {
    /// Schedule a render pass for the current (frozen) virtual time.
    fn request_repaint(&mut self);

    /// Block until the most recently requested render pass has completed.
    fn wait_render_complete(&mut self) -> MapcapResult<()>;

    /// Whether all tiles/sprites/glyphs needed by the current view are loaded.
    fn assets_ready(&self) -> bool;

    /// Read back an RGBA8 region of the frame buffer, top-down row order.
    fn read_frame_buffer(&mut self, x: u32, y: u32, width: u32, height: u32)
    -> MapcapResult<FrameRgba>;

    fn pose(&self) -> CameraPose;

    fn set_pose(&mut self, pose: &CameraPose);

    /// Animate the camera to `pose` over `duration_ms`, blocking until the
    /// transition completes.
    fn ease_to(&mut self, pose: &CameraPose, duration_ms: f64) -> MapcapResult<()>;

    /// Current drawing surface size in pixels.
    fn surface_size(&self) -> (u32, u32);

    /// Resize the drawing surface (used when the encode resolution differs
    /// from the on-screen resolution; restored after the session).
    fn resize_surface(&mut self, width: u32, height: u32) -> MapcapResult<()>;
}
