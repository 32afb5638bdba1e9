//! Process-wide media subsystem, started by the first session that needs it
//! and shut down when the last one lets go.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::PlatformError;

/// Startup and shutdown hooks of the platform media framework.
pub trait MediaRuntime: Send + Sync {
    fn startup(&self) -> Result<(), PlatformError>;
    fn shutdown(&self);
}

/// Runtime with nothing to start, for backends that need no global setup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRuntime;

impl MediaRuntime for NoopRuntime {
    fn startup(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn shutdown(&self) {}
}

/// Reference-counted owner of a [`MediaRuntime`].
///
/// Each [`SubsystemHandle`] counts as one user. The runtime is started when
/// the count goes from zero to one and shut down when it returns to zero.
pub struct Subsystem {
    runtime: Box<dyn MediaRuntime>,
    users: Mutex<usize>,
}

impl Subsystem {
    pub fn new(runtime: impl MediaRuntime + 'static) -> Arc<Self> {
        Arc::new(Subsystem {
            runtime: Box::new(runtime),
            users: Mutex::new(0),
        })
    }

    pub fn noop() -> Arc<Self> {
        Self::new(NoopRuntime)
    }

    /// Register one more user, starting the runtime if this is the first.
    pub fn acquire(self: &Arc<Self>) -> Result<SubsystemHandle, PlatformError> {
        let mut users = self.users.lock();
        if *users == 0 {
            self.runtime.startup()?;
            info!("media subsystem started");
        }
        *users += 1;
        debug!(users = *users, "media subsystem acquired");
        Ok(SubsystemHandle {
            subsystem: Arc::clone(self),
        })
    }

    /// Number of live handles.
    pub fn users(&self) -> usize {
        *self.users.lock()
    }

    fn release(&self) {
        let mut users = self.users.lock();
        *users = users.saturating_sub(1);
        debug!(users = *users, "media subsystem released");
        if *users == 0 {
            self.runtime.shutdown();
            info!("media subsystem shut down");
        }
    }
}

/// One user's hold on the [`Subsystem`]; released exactly once on drop.
pub struct SubsystemHandle {
    subsystem: Arc<Subsystem>,
}

impl Drop for SubsystemHandle {
    fn drop(&mut self) {
        self.subsystem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail: bool,
    }

    impl MediaRuntime for Counting {
        fn startup(&self) -> Result<(), PlatformError> {
            if self.fail {
                return Err(PlatformError::message("no media stack"));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn starts_once_and_stops_with_last_user() {
        let runtime = Counting::default();
        let (starts, stops) = (runtime.starts.clone(), runtime.stops.clone());
        let subsystem = Subsystem::new(runtime);

        let a = subsystem.acquire().unwrap();
        let b = subsystem.acquire().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(subsystem.users(), 2);

        drop(a);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(subsystem.users(), 0);

        let _c = subsystem.acquire().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_startup_registers_no_user() {
        let subsystem = Subsystem::new(Counting {
            fail: true,
            ..Default::default()
        });
        assert!(subsystem.acquire().is_err());
        assert_eq!(subsystem.users(), 0);
    }
}
