//! Pipeline layer: a blocking producer/consumer ring sitting above a raw TX or RX session, so
//! application threads can `get_frame`/`put_frame` without polling the session's own
//! `tasklet_tick` cadence.
//!
//! Exactly one of TX or RX direction is active per pipeline; which one just changes who blocks
//! on `get_frame` (the application writer for TX, the application reader for RX) and what
//! `put_frame` marks the buffer as (`Ready` for TX, `Free` for RX).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::TransportError;

/// An optional hook converting between the application-visible frame format and the on-wire
/// format (e.g. ST 2022-6 codec, pixel re-packing). Runs on the pipeline thread, not the
/// session's scheduler tasklet.
pub trait FormatPlugin: Send {
    fn to_wire(&mut self, app_frame: &[u8]) -> Vec<u8>;
    fn from_wire(&mut self, wire_frame: &[u8]) -> Vec<u8>;
}

struct Inner {
    free: VecDeque<Vec<u8>>,
    ready: VecDeque<Vec<u8>>,
    shutdown: bool,
}

/// Blocking buffer ring between an application thread and a session's framebuffer slots.
pub struct Pipeline {
    inner: Mutex<Inner>,
    cond: Condvar,
    plugin: Mutex<Option<Box<dyn FormatPlugin>>>,
}

impl Pipeline {
    pub fn new(num_buffers: usize, buffer_len: usize) -> Pipeline {
        let mut free = VecDeque::with_capacity(num_buffers);
        for _ in 0..num_buffers {
            free.push_back(vec![0u8; buffer_len]);
        }
        Pipeline {
            inner: Mutex::new(Inner {
                free,
                ready: VecDeque::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
            plugin: Mutex::new(None),
        }
    }

    pub fn with_plugin(self, plugin: Box<dyn FormatPlugin>) -> Pipeline {
        *self.plugin.lock().unwrap() = Some(plugin);
        self
    }

    /// TX side: blocks until a free buffer is available (or `deadline` elapses, or
    /// `wake_block` is called for shutdown), returning it for the application to write into.
    pub fn get_writable(&self, deadline: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return Err(TransportError::Timeout("pipeline shut down".to_string()));
            }
            if let Some(buf) = inner.free.pop_front() {
                return Ok(buf);
            }
            let (guard, timeout) = match deadline {
                Some(d) => {
                    let (g, r) = self.cond.wait_timeout(inner, d).unwrap();
                    (g, r.timed_out())
                }
                None => (self.cond.wait(inner).unwrap(), false),
            };
            inner = guard;
            if timeout {
                return Err(TransportError::Timeout(
                    "deadline exceeded waiting for a free TX buffer".to_string(),
                ));
            }
        }
    }

    /// TX side: hands a written buffer back, marking it `Ready` for the session to send. Runs
    /// the format plugin's `to_wire` step first, if one is installed.
    pub fn put_ready(&self, mut buf: Vec<u8>) {
        if let Some(plugin) = self.plugin.lock().unwrap().as_mut() {
            buf = plugin.to_wire(&buf);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.ready.push_back(buf);
        self.cond.notify_all();
    }

    /// RX side: blocks until a completed buffer is available, returning it for the application
    /// to read. Runs the format plugin's `from_wire` step first, if one is installed.
    pub fn get_readable(&self, deadline: Option<Duration>) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return Err(TransportError::Timeout("pipeline shut down".to_string()));
            }
            if let Some(buf) = inner.ready.pop_front() {
                drop(inner);
                let converted = match self.plugin.lock().unwrap().as_mut() {
                    Some(plugin) => plugin.from_wire(&buf),
                    None => buf,
                };
                return Ok(converted);
            }
            let (guard, timeout) = match deadline {
                Some(d) => {
                    let (g, r) = self.cond.wait_timeout(inner, d).unwrap();
                    (g, r.timed_out())
                }
                None => (self.cond.wait(inner).unwrap(), false),
            };
            inner = guard;
            if timeout {
                return Err(TransportError::Timeout(
                    "deadline exceeded waiting for a completed RX buffer".to_string(),
                ));
            }
        }
    }

    /// RX side: returns a consumed buffer to the free pool.
    pub fn put_free(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.free.push_back(buf);
        self.cond.notify_all();
    }

    /// Delivers a frame produced by the session's own reassembly path (called from the
    /// scheduler/session side, not the application side).
    pub fn deliver(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner.ready.push_back(buf);
        self.cond.notify_all();
    }

    /// Breaks every blocked `get_writable`/`get_readable` waiter, e.g. on session shutdown.
    pub fn wake_block(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_writable_returns_immediately_when_buffer_free() {
        let pipeline = Pipeline::new(2, 16);
        let buf = pipeline.get_writable(None).unwrap();
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn put_ready_then_get_readable_round_trips_a_frame() {
        let pipeline = Pipeline::new(1, 4);
        let buf = pipeline.get_writable(None).unwrap();
        pipeline.put_ready(buf);
        let read = pipeline.get_readable(None).unwrap();
        assert_eq!(read.len(), 4);
    }

    #[test]
    fn wake_block_unblocks_a_waiting_reader() {
        let pipeline = Arc::new(Pipeline::new(1, 4));
        let reader = {
            let pipeline = pipeline.clone();
            thread::spawn(move || pipeline.get_readable(None))
        };
        thread::sleep(Duration::from_millis(20));
        pipeline.wake_block();
        assert!(reader.join().unwrap().is_err());
    }

    #[test]
    fn get_writable_times_out_when_no_buffer_is_returned() {
        let pipeline = Pipeline::new(1, 4);
        let _held = pipeline.get_writable(None).unwrap();
        let result = pipeline.get_writable(Some(Duration::from_millis(10)));
        assert!(result.is_err());
    }
}
