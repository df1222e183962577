//! The simulated timer interrupt
use isr_timer::{PortTraits, TimerPool};
use std::{
    panic, sync::mpsc, thread,
    time::{Duration, Instant},
};

/// Options for [`TickDriver::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDriverOptions {
    /// The interval between two calls to [`TimerPool::handle_tick`].
    pub period: Duration,
}

impl Default for TickDriverOptions {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(1),
        }
    }
}

enum DriverCmd {
    SetPeriod(Duration),
}

/// A background thread calling [`TimerPool::handle_tick`] periodically.
///
/// Late ticks are not made up for. The thread stops when `TickDriver` is
/// dropped or [`TickDriver::stop`] is called.
pub struct TickDriver {
    cmd_send: Option<mpsc::Sender<DriverCmd>>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl TickDriver {
    /// Start a thread driving `pool`.
    pub fn start<Traits: PortTraits, const N: usize>(
        pool: &'static TimerPool<Traits, N>,
        options: TickDriverOptions,
    ) -> Self {
        let (cmd_send, cmd_recv) = mpsc::channel();
        log::trace!("starting the tick driver thread ({options:?})");

        let join_handle = thread::Builder::new()
            .name("tick driver".into())
            .spawn(move || {
                let mut period = options.period;
                let mut next_deadline = Instant::now() + period;
                loop {
                    let timeout = next_deadline.saturating_duration_since(Instant::now());
                    match cmd_recv.recv_timeout(timeout) {
                        Err(mpsc::RecvTimeoutError::Disconnected) => {
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            if let Err(e) = pool.handle_tick() {
                                log::warn!("handle_tick failed: {e:?}");
                            }
                            next_deadline = (next_deadline + period).max(Instant::now());
                        }
                        Ok(DriverCmd::SetPeriod(new_period)) => {
                            log::trace!("changing the tick period to {new_period:?}");
                            period = new_period;
                            next_deadline = Instant::now() + period;
                        }
                    }
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn the tick driver thread: {e}"));

        Self {
            cmd_send: Some(cmd_send),
            join_handle: Some(join_handle),
        }
    }

    /// Change the interval between ticks. The next tick happens `period`
    /// after this call.
    pub fn set_period(&self, period: Duration) {
        if let Some(cmd_send) = &self.cmd_send {
            // The thread is gone only if it panicked, which `stop` reports
            let _ = cmd_send.send(DriverCmd::SetPeriod(period));
        }
    }

    /// Stop the thread and wait until it exits. Propagates any panic that
    /// occurred in a timer action.
    pub fn stop(mut self) {
        if let Err(e) = self.shutdown() {
            panic::resume_unwind(e);
        }
    }

    fn shutdown(&mut self) -> thread::Result<()> {
        // `cmd_recv.recv_timeout` will return `Err(Disconnected)` when we drop
        // the corresponding sender (`cmd_send`).
        log::trace!("stopping the tick driver thread");
        self.cmd_send = None;
        let result = self.join_handle.take().map_or(Ok(()), |h| h.join());
        log::trace!("stopped the tick driver thread");
        result
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        if self.join_handle.is_some() && self.shutdown().is_err() && !thread::panicking() {
            log::error!("the tick driver thread panicked");
        }
    }
}
