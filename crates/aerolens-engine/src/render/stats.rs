use crate::media::FrameTiming;

/// Timing of the most recent render ticks.
///
/// Latencies are derived from the frame's timing metadata, which decoders
/// stamp with [`crate::time::monotonic_us`]. A zero timestamp means "not
/// reported" and leaves the derived value at zero.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    /// Frames superseded in the queue before they could be drawn.
    pub frames_dropped: u64,
    /// Demux output to decoder output.
    pub decode_latency_us: u64,
    /// Decoder output to render.
    pub render_latency_us: u64,
    /// Capture (local NTP) to render, or decode + render latency without NTP.
    pub estimated_latency_us: u64,
    /// Time since the previous render, as reported by the caller.
    pub render_interval_us: u64,
    pub fps: f32,
}

impl RenderStats {
    pub(crate) fn record_dropped(&mut self, dropped: u64) {
        self.frames_dropped += dropped;
    }

    /// Records a rendered frame.
    pub(crate) fn record_render(&mut self, timing: &FrameTiming, now_us: u64, last_render_us: u64) {
        self.frames_rendered += 1;

        self.decode_latency_us = elapsed(timing.demux_output_us, timing.decoder_output_us);
        self.render_latency_us = elapsed(timing.decoder_output_us, now_us);
        self.estimated_latency_us = if timing.ntp_local_us > 0 {
            now_us.saturating_sub(timing.ntp_local_us)
        } else {
            self.decode_latency_us + self.render_latency_us
        };

        self.render_interval_us = elapsed(last_render_us, now_us);
        self.fps = if self.render_interval_us > 0 {
            1_000_000.0 / self.render_interval_us as f32
        } else {
            0.0
        };
    }
}

fn elapsed(from_us: u64, to_us: u64) -> u64 {
    if from_us == 0 || to_us == 0 {
        return 0;
    }
    to_us.saturating_sub(from_us)
}
