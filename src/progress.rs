use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared progress state updated atomically by the SVI loop.
///
/// A dedicated thread reads these counters and renders a live progress
/// bar to stderr, completely independent of the optimization thread.
/// The latest ELBO sample is stored as its f64 bit pattern.
pub struct ProgressState {
    pub total_steps: usize,
    pub completed: AtomicUsize,
    pub elbo_bits: AtomicU64,
    pub done: AtomicBool,
    pub start_time: Instant,
}

impl ProgressState {
    pub fn new(total_steps: usize) -> Self {
        Self {
            total_steps,
            completed: AtomicUsize::new(0),
            elbo_bits: AtomicU64::new(f64::NAN.to_bits()),
            done: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    pub fn step(&self, elbo: f64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.elbo_bits.store(elbo.to_bits(), Ordering::Relaxed);
    }

    pub fn current_elbo(&self) -> f64 {
        f64::from_bits(self.elbo_bits.load(Ordering::Relaxed))
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}

fn fmt_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 10_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

fn fmt_time(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0) as usize;
        let s = (secs % 60.0) as usize;
        format!("{}:{:02}", mins, s)
    }
}

fn render(state: &ProgressState) {
    let completed = state.completed.load(Ordering::Relaxed);
    let total = state.total_steps;
    let elbo = state.current_elbo();
    let elapsed = state.start_time.elapsed().as_secs_f64();

    let pct = if total > 0 {
        (completed * 100 / total).min(100)
    } else {
        0
    };
    let speed = if elapsed > 0.05 {
        completed as f64 / elapsed
    } else {
        0.0
    };
    let remaining = if speed > 0.0 && completed < total {
        (total - completed) as f64 / speed
    } else {
        0.0
    };

    let bar_width = 30;
    let filled = if total > 0 {
        (bar_width * completed).min(bar_width * total) / total
    } else {
        0
    };
    let bar: String = "━".repeat(filled) + &"╌".repeat(bar_width - filled);

    let elbo_s = if elbo.is_finite() {
        format!("{:.3}", elbo)
    } else {
        "—".to_string()
    };

    let is_done = state.done.load(Ordering::Relaxed);
    let mut err = std::io::stderr().lock();

    if is_done {
        let _ = write!(
            err,
            "\rOptimizing {} {:>3}% │ {}/{} steps │ elbo {} │ {}\x1b[K\n",
            bar,
            pct,
            fmt_count(completed),
            fmt_count(total),
            elbo_s,
            fmt_time(elapsed),
        );
    } else {
        let _ = write!(
            err,
            "\rOptimizing {} {:>3}% │ {}/{} steps │ elbo {} │ {:.0} it/s │ {} < ~{}\x1b[K",
            bar,
            pct,
            fmt_count(completed),
            fmt_count(total),
            elbo_s,
            speed,
            fmt_time(elapsed),
            fmt_time(remaining),
        );
    }
    let _ = err.flush();
}

/// Spawn a background thread that renders the progress bar at ~10 Hz.
/// Returns a join handle; call `state.finish()` then `handle.join()` to
/// clean up after the fit.
pub fn spawn_progress_thread(state: Arc<ProgressState>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !state.done.load(Ordering::Relaxed) {
            render(&state);
            std::thread::sleep(Duration::from_millis(100));
        }
        render(&state);
    })
}
