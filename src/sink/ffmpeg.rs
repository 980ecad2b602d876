//! Shared plumbing for driving the system `ffmpeg` binary over pipes.
//!
//! We intentionally shell out to `ffmpeg` rather than linking codec
//! libraries, so the crate carries no native dev-header requirements.

use std::{
    io::{Read as _, Write as _},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    thread,
};

use crossbeam_channel::Receiver;

use crate::{
    error::{MapcapError, MapcapResult},
    sink::EncoderConfig,
};

pub(crate) fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Raw `ffmpeg -encoders` listing, empty on failure.
pub(crate) fn available_encoders() -> String {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default()
}

/// Whether `listing` (from [`available_encoders`]) contains the named encoder.
/// Listing lines look like ` V....D libx264    H.264 / ...`.
pub(crate) fn listing_has_encoder(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

/// Input-side arguments shared by every backend: raw RGBA frames on stdin at
/// the session's resolution and rate, no audio track.
pub(crate) fn rawvideo_input_args(cfg: &EncoderConfig) -> Vec<String> {
    vec![
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", cfg.width, cfg.height),
        "-r".into(),
        format!("{}", cfg.fps),
        "-i".into(),
        "pipe:0".into(),
        "-an".into(),
    ]
}

pub(crate) struct FfmpegPipe {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl FfmpegPipe {
    pub(crate) fn spawn(args: &[String]) -> MapcapResult<Self> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-loglevel", "error"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            MapcapError::encoder_init(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MapcapError::encode("failed to open ffmpeg stdin (unexpected)"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
        })
    }

    pub(crate) fn take_stdin(&mut self) -> MapcapResult<ChildStdin> {
        self.stdin
            .take()
            .ok_or_else(|| MapcapError::encode("ffmpeg stdin already taken or closed"))
    }

    pub(crate) fn take_stdout(&mut self) -> MapcapResult<ChildStdout> {
        self.child
            .stdout
            .take()
            .ok_or_else(|| MapcapError::encode("ffmpeg stdout already taken (unexpected)"))
    }

    pub(crate) fn write_frame(&mut self, data: &[u8]) -> MapcapResult<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MapcapError::encode("encoder input is already closed"));
        };
        stdin
            .write_all(data)
            .map_err(|e| MapcapError::encode(format!("failed to write frame to encoder: {e}")))
    }

    /// Close stdin so the encoder sees end-of-input and can finalize.
    pub(crate) fn close_stdin(&mut self) {
        drop(self.stdin.take());
    }

    /// Wait for the process and surface a trimmed stderr on failure.
    pub(crate) fn wait_checked(&mut self) -> MapcapResult<()> {
        let status = self
            .child
            .wait()
            .map_err(|e| MapcapError::encode(format!("failed to wait for ffmpeg: {e}")))?;

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = self.child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(MapcapError::encode(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    pub(crate) fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Drain `stdout` to EOF on a background thread, handing back the collected
/// bytes once the encoder closes its end.
pub(crate) fn collect_output(mut stdout: ChildStdout) -> Receiver<Vec<u8>> {
    let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}
