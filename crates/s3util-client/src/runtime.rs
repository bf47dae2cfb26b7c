//! Process-wide runtime lifecycle
//!
//! The embedding application calls [`init_runtime`] once before building
//! clients and [`shutdown_runtime`] once when it is done with them. Client
//! instances never initialize or tear down the runtime themselves, so
//! dropping an `S3Util` has no process-wide effect.
//!
//! Calls are reference counted: nested init/shutdown pairs (one per
//! subsystem, or per test) keep the runtime active until the last shutdown.

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct RuntimeState {
    active: usize,
}

impl RuntimeState {
    /// Returns true when this call activated the runtime
    fn init(&mut self) -> bool {
        self.active += 1;
        self.active == 1
    }

    /// Returns true when this call deactivated the runtime
    fn shutdown(&mut self) -> bool {
        match self.active {
            0 => false,
            n => {
                self.active = n - 1;
                self.active == 0
            }
        }
    }
}

static RUNTIME: Mutex<RuntimeState> = Mutex::new(RuntimeState { active: 0 });

/// Initialize the runtime (or add a reference to it)
pub fn init_runtime() {
    if RUNTIME.lock().init() {
        info!("s3util runtime initialized");
    }
}

/// Release one reference; the last one shuts the runtime down
pub fn shutdown_runtime() {
    let mut state = RUNTIME.lock();
    if state.active == 0 {
        warn!("shutdown_runtime called without a matching init_runtime");
        return;
    }
    if state.shutdown() {
        info!("s3util runtime shut down");
    }
}

#[must_use]
pub fn is_runtime_initialized() -> bool {
    RUNTIME.lock().active > 0
}
