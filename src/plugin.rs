//! Plugin host contract.
//!
//! The actual plugin ABI lives outside the core; routes only need this
//! much of it to run an insert chain.

use tapedeck_core::{ChanCount, SampleCnt};

/// One hosted plugin instance in a route's insert chain.
///
/// `connect_and_run` is called on the audio thread and must not block
/// or allocate. A plugin that fails is bypassed, not removed; the track
/// stays audible.
pub trait PluginHost: Send {
    fn name(&self) -> &str;

    /// Negotiate channel counts. Returns the actual output count.
    fn configure_io(&mut self, input: ChanCount, output: ChanCount) -> ChanCount;

    /// Process `nframes` starting at `offset` within the buffers.
    /// Returns false on failure; the caller bypasses the plugin.
    fn connect_and_run(&mut self, buffers: &mut [Vec<f32>], nframes: usize, offset: usize) -> bool;

    fn set_parameter(&mut self, port: u32, value: f32);

    /// Processing latency in frames, compensated by the caller.
    fn latency(&self) -> SampleCnt {
        0
    }
}

/// Run an insert chain over a track's buffers, bypassing any plugin
/// that reports failure.
pub fn run_insert_chain(
    chain: &mut [Box<dyn PluginHost>],
    buffers: &mut [Vec<f32>],
    nframes: usize,
    bypass: &mut [bool],
) {
    for (plugin, bypassed) in chain.iter_mut().zip(bypass.iter_mut()) {
        if *bypassed {
            continue;
        }
        if !plugin.connect_and_run(buffers, nframes, 0) {
            tracing::warn!(plugin = plugin.name(), "plugin failed, bypassing");
            *bypassed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gain(f32);

    impl PluginHost for Gain {
        fn name(&self) -> &str {
            "gain"
        }

        fn configure_io(&mut self, input: ChanCount, _output: ChanCount) -> ChanCount {
            input
        }

        fn connect_and_run(
            &mut self,
            buffers: &mut [Vec<f32>],
            nframes: usize,
            offset: usize,
        ) -> bool {
            for buf in buffers {
                for sample in &mut buf[offset..offset + nframes] {
                    *sample *= self.0;
                }
            }
            true
        }

        fn set_parameter(&mut self, _port: u32, value: f32) {
            self.0 = value;
        }
    }

    struct Broken;

    impl PluginHost for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn configure_io(&mut self, input: ChanCount, _output: ChanCount) -> ChanCount {
            input
        }

        fn connect_and_run(&mut self, _: &mut [Vec<f32>], _: usize, _: usize) -> bool {
            false
        }

        fn set_parameter(&mut self, _: u32, _: f32) {}
    }

    #[test]
    fn test_chain_applies_in_order() {
        let mut chain: Vec<Box<dyn PluginHost>> = vec![Box::new(Gain(2.0)), Box::new(Gain(3.0))];
        let mut bufs = vec![vec![1.0f32; 8]];
        let mut bypass = vec![false, false];

        run_insert_chain(&mut chain, &mut bufs, 8, &mut bypass);
        assert!(bufs[0].iter().all(|&s| (s - 6.0).abs() < 1e-6));
    }

    #[test]
    fn test_failed_plugin_bypassed_track_stays_audible() {
        let mut chain: Vec<Box<dyn PluginHost>> =
            vec![Box::new(Broken), Box::new(Gain(2.0))];
        let mut bufs = vec![vec![1.0f32; 8]];
        let mut bypass = vec![false, false];

        run_insert_chain(&mut chain, &mut bufs, 8, &mut bypass);
        assert!(bypass[0], "broken plugin marked bypassed");
        assert!(!bypass[1]);
        assert!(bufs[0].iter().all(|&s| (s - 2.0).abs() < 1e-6));

        // Next cycle skips the broken one without calling it.
        run_insert_chain(&mut chain, &mut bufs, 8, &mut bypass);
        assert!(bufs[0].iter().all(|&s| (s - 4.0).abs() < 1e-6));
    }
}
