use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::drivers::{Instrument, InstrumentError};

enum Op {
    Write(String),
    Query(String),
    Close,
}

type Reply = Result<Option<f64>, InstrumentError>;

/// Runs an instrument on its own worker thread so every call has a deadline.
///
/// A call that misses its deadline returns [`InstrumentError::Timeout`] and the caller moves
/// on. The worker finishes the hung call in the background; its late reply is recognised by
/// request id and dropped. Reads and writes queued behind it whose callers have already
/// given up are skipped rather than sent to the device.
pub struct TimedInstrument {
    name: String,
    timeout: Duration,
    next_id: u64,
    abandoned: Arc<AtomicU64>,
    requests: Sender<(u64, Op)>,
    replies: Receiver<(u64, Reply)>,
}

impl TimedInstrument {
    pub fn spawn<I: Instrument + 'static>(mut instrument: I, timeout: Duration) -> Self {
        let name = instrument.name().to_owned();
        let (requests, rx_requests) = mpsc::channel::<(u64, Op)>();
        let (tx_replies, replies) = mpsc::channel();
        let worker_name = name.clone();
        let abandoned = Arc::new(AtomicU64::new(0));
        let given_up = abandoned.clone();
        thread::spawn(move || {
            for (id, op) in rx_requests {
                let stale = id <= given_up.load(Ordering::Acquire);
                if stale && !matches!(op, Op::Close) {
                    debug!("{worker_name}: skipping request #{id}, caller gave up");
                    continue;
                }
                let reply = match op {
                    Op::Write(command) => instrument.write(&command).map(|_| None),
                    Op::Query(request) => instrument.query(&request).map(Some),
                    Op::Close => instrument.close().map(|_| None),
                };
                if tx_replies.send((id, reply)).is_err() {
                    break;
                }
            }
            debug!("{worker_name}: worker thread exiting");
        });
        Self {
            name,
            timeout,
            next_id: 0,
            abandoned,
            requests,
            replies,
        }
    }

    fn call(&mut self, op: Op, label: &str) -> Reply {
        self.next_id += 1;
        let id = self.next_id;
        self.requests
            .send((id, op))
            .map_err(|_| InstrumentError::WorkerGone {
                instrument: self.name.clone(),
            })?;
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok((reply_id, reply)) if reply_id == id => return reply,
                Ok((stale, _)) => {
                    warn!("{}: dropping late reply to request #{stale}", self.name);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.abandoned.fetch_max(id, Ordering::AcqRel);
                    return Err(InstrumentError::Timeout {
                        instrument: self.name.clone(),
                        request: label.to_owned(),
                        after: self.timeout,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(InstrumentError::WorkerGone {
                        instrument: self.name.clone(),
                    })
                }
            }
        }
    }
}

impl Instrument for TimedInstrument {
    fn name(&self) -> &str {
        &self.name
    }
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.call(Op::Write(command.to_owned()), command).map(|_| ())
    }
    fn query(&mut self, request: &str) -> Result<f64, InstrumentError> {
        match self.call(Op::Query(request.to_owned()), request)? {
            Some(value) => Ok(value),
            None => Err(InstrumentError::BadReply {
                instrument: self.name.clone(),
                request: request.to_owned(),
                reply: String::new(),
            }),
        }
    }
    fn close(&mut self) -> Result<(), InstrumentError> {
        self.call(Op::Close, "close").map(|_| ())
    }
}
