use std::{
    borrow::Cow,
    fmt::Display,
    io::{stderr, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// Progress indicator on stderr; chain output and logs stay unpolluted.
pub struct Spinner {
    handle: Option<thread::JoinHandle<()>>,
    spinning: Arc<AtomicBool>,
}

impl Spinner {
    pub fn start(msg: impl Into<Cow<'static, str>>) -> Self {
        let spinning = Arc::new(AtomicBool::new(true));
        let flag = spinning.clone();
        let msg = msg.into();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            let mut out = stderr();
            for frame in FRAMES.iter().cycle() {
                if !flag.load(Ordering::Relaxed) {
                    break;
                }
                let _ = write!(out, "\r[{frame}] {msg} ({}s)", started.elapsed().as_secs());
                let _ = out.flush();
                thread::sleep(Duration::from_millis(120));
            }
            let _ = write!(out, "\r");
        });

        Self { handle: Some(handle), spinning }
    }

    pub fn stop(&mut self, msg: impl Display) {
        self.spinning.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        eprintln!("\r[*] {msg}");
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.spinning.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
