//! Background analyser worker.
//!
//! A single worker thread consumes a FIFO of weak source references and
//! runs transient detection on each. A global active lock keeps at most
//! one analysis running at a time so disk and CPU contention stays
//! bounded no matter how many sources get queued.

use crate::transient::TransientDetector;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error};

/// What the analyser needs from a source.
///
/// `read_at` may be called from the analyser thread while the source is
/// still being played back; implementations must tolerate concurrent
/// readers.
pub trait Analysable: Send + Sync {
    fn name(&self) -> String;
    fn can_be_analysed(&self) -> bool;
    fn has_been_analysed(&self) -> bool;
    fn set_been_analysed(&self, yn: bool);
    fn sample_rate(&self) -> f64;
    fn length_samples(&self) -> i64;
    fn read_at(&self, buf: &mut [f32], pos: i64) -> std::io::Result<usize>;
    /// Store the detected onsets on the source.
    fn set_transients(&self, positions: Vec<i64>);
}

pub struct Analyser {
    queue: Mutex<VecDeque<Weak<dyn Analysable>>>,
    sources_to_analyse: Condvar,
    active: Mutex<()>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Analyser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            sources_to_analyse: Condvar::new(),
            active: Mutex::new(()),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Spawn the worker. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("tapedeck-analyser".into())
            .spawn(move || this.work())
            .expect("failed to spawn analyser thread");
        *thread = Some(handle);
    }

    /// Stop the worker and join it.
    pub fn terminate(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.sources_to_analyse.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Ask for `src` to be analysed.
    ///
    /// Silently returns if the source cannot be analysed, or if it has
    /// already been analysed and `force` is false.
    pub fn queue_source_for_analysis(&self, src: &Arc<dyn Analysable>, force: bool) {
        if !src.can_be_analysed() {
            return;
        }
        if !force && src.has_been_analysed() {
            return;
        }

        self.queue.lock().push_back(Arc::downgrade(src));
        self.sources_to_analyse.notify_all();
    }

    /// Drop everything still queued.
    pub fn flush(&self) {
        let mut queue = self.queue.lock();
        let _active = self.active.lock();
        queue.clear();
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn work(self: Arc<Self>) {
        loop {
            let src = {
                let mut queue = self.queue.lock();
                loop {
                    if !self.running.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(weak) = queue.pop_front() {
                        break weak;
                    }
                    self.sources_to_analyse.wait(&mut queue);
                }
            };

            // Source may have been dropped while queued.
            let Some(src) = src.upgrade() else {
                continue;
            };

            if src.length_samples() == 0 {
                continue;
            }

            let _active = self.active.lock();
            self.analyse(&src);
        }
    }

    fn analyse(&self, src: &Arc<dyn Analysable>) {
        let mut detector = TransientDetector::new(src.sample_rate());
        match detector.run(src.as_ref()) {
            Ok(positions) => {
                debug!(source = %src.name(), onsets = positions.len(), "analysis complete");
                src.set_transients(positions);
                src.set_been_analysed(true);
            }
            Err(err) => {
                error!(source = %src.name(), %err, "transient analysis failed");
                src.set_been_analysed(false);
            }
        }
    }
}

impl Drop for Analyser {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FakeSource {
        name: String,
        samples: Vec<f32>,
        analysed: AtomicBool,
        transient_count: AtomicUsize,
        fail_reads: bool,
    }

    impl FakeSource {
        fn with_clicks() -> Self {
            let mut samples = vec![0.0f32; 48000];
            for &pos in &[9600usize, 24000, 38400] {
                for i in 0..60 {
                    samples[pos + i] += (-0.1 * i as f32).exp() * 0.8;
                }
            }
            Self {
                name: "take-1".into(),
                samples,
                analysed: AtomicBool::new(false),
                transient_count: AtomicUsize::new(0),
                fail_reads: false,
            }
        }
    }

    impl Analysable for FakeSource {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn can_be_analysed(&self) -> bool {
            true
        }

        fn has_been_analysed(&self) -> bool {
            self.analysed.load(Ordering::SeqCst)
        }

        fn set_been_analysed(&self, yn: bool) {
            self.analysed.store(yn, Ordering::SeqCst);
        }

        fn sample_rate(&self) -> f64 {
            48000.0
        }

        fn length_samples(&self) -> i64 {
            self.samples.len() as i64
        }

        fn read_at(&self, buf: &mut [f32], pos: i64) -> std::io::Result<usize> {
            if self.fail_reads {
                return Err(std::io::Error::other("simulated read failure"));
            }
            let pos = pos as usize;
            if pos >= self.samples.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.samples.len() - pos);
            buf[..n].copy_from_slice(&self.samples[pos..pos + n]);
            Ok(n)
        }

        fn set_transients(&self, positions: Vec<i64>) {
            self.transient_count.store(positions.len(), Ordering::SeqCst);
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_analyses_queued_source() {
        let analyser = Analyser::new();
        analyser.start();

        let src = Arc::new(FakeSource::with_clicks());
        let dyn_src: Arc<dyn Analysable> = src.clone();
        analyser.queue_source_for_analysis(&dyn_src, false);

        assert!(wait_until(Duration::from_secs(5), || src.has_been_analysed()));
        assert!(src.transient_count.load(Ordering::SeqCst) > 0);

        analyser.terminate();
    }

    #[test]
    fn test_idempotent_unless_forced() {
        let analyser = Analyser::new();

        let src = Arc::new(FakeSource::with_clicks());
        src.set_been_analysed(true);
        let dyn_src: Arc<dyn Analysable> = src.clone();

        analyser.queue_source_for_analysis(&dyn_src, false);
        assert_eq!(analyser.pending(), 0);

        analyser.queue_source_for_analysis(&dyn_src, true);
        assert_eq!(analyser.pending(), 1);
    }

    #[test]
    fn test_failed_read_marks_not_analysed() {
        let analyser = Analyser::new();
        analyser.start();

        let src = Arc::new(FakeSource {
            fail_reads: true,
            ..FakeSource::with_clicks()
        });
        src.set_been_analysed(true);
        let dyn_src: Arc<dyn Analysable> = src.clone();
        analyser.queue_source_for_analysis(&dyn_src, true);

        assert!(wait_until(Duration::from_secs(5), || !src.has_been_analysed()));
        analyser.terminate();
    }

    #[test]
    fn test_dropped_source_is_skipped() {
        let analyser = Analyser::new();

        let src = Arc::new(FakeSource::with_clicks());
        let dyn_src: Arc<dyn Analysable> = src.clone();
        analyser.queue_source_for_analysis(&dyn_src, false);
        drop(dyn_src);
        drop(src);

        // Starting after the source is gone must not wedge the worker.
        analyser.start();
        assert!(wait_until(Duration::from_secs(5), || analyser.pending() == 0));
        analyser.terminate();
    }

    #[test]
    fn test_flush_clears_queue() {
        let analyser = Analyser::new();
        let src = Arc::new(FakeSource::with_clicks());
        let dyn_src: Arc<dyn Analysable> = src.clone();

        analyser.queue_source_for_analysis(&dyn_src, false);
        analyser.queue_source_for_analysis(&dyn_src, false);
        assert_eq!(analyser.pending(), 2);

        analyser.flush();
        assert_eq!(analyser.pending(), 0);
    }
}
