//! Deterministic doubles for the download loop.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{self, Write},
    time::Duration,
};

use async_trait::async_trait;

use crate::fetch::Sleeper;
use crate::source::{TileSource, TransportError};

/// One scripted response of a [`StubTileSource`].
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Write the body to the sink and report success.
    Succeed(String),
    /// Fail without writing anything.
    Fail,
    /// Write a truncated body to the sink, then fail. Exercises the
    /// partial-file cleanup in the fetch loop.
    FailWithPartialBody,
}

/// [`TileSource`] that replays a fixed script instead of a server.
#[derive(Debug, Default)]
pub struct StubTileSource {
    script: RefCell<VecDeque<ScriptedOutcome>>,
    fallback: Option<String>,
    requests: Cell<u64>,
}

impl StubTileSource {
    /// A source that answers every request with the same body.
    pub fn always(body: &str) -> Self {
        Self {
            fallback: Some(body.to_owned()),
            ..Self::default()
        }
    }

    /// A source that plays `outcomes` in order and panics when the
    /// script runs out.
    pub fn scripted(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            script: RefCell::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> u64 {
        self.requests.get()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        if let Some(outcome) = self.script.borrow_mut().pop_front() {
            return outcome;
        }
        match &self.fallback {
            Some(body) => ScriptedOutcome::Succeed(body.clone()),
            None => panic!("stub source received a request past the end of its script"),
        }
    }
}

#[async_trait(?Send)]
impl TileSource for StubTileSource {
    async fn fetch_tile(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError> {
        self.requests.set(self.requests.get() + 1);
        match self.next_outcome() {
            ScriptedOutcome::Succeed(body) => {
                sink.write_all(body.as_bytes())
                    .map_err(|source| TransportError::Network {
                        url: url.to_owned(),
                        source,
                    })?;
                Ok(body.len() as u64)
            }
            ScriptedOutcome::Fail => Err(TransportError::Http {
                url: url.to_owned(),
                status: 503,
                message: "scripted failure".to_owned(),
            }),
            ScriptedOutcome::FailWithPartialBody => {
                sink.write_all(b"<truncated")
                    .map_err(|source| TransportError::Network {
                        url: url.to_owned(),
                        source,
                    })?;
                Err(TransportError::Network {
                    url: url.to_owned(),
                    source: io::Error::new(io::ErrorKind::ConnectionReset, "scripted reset"),
                })
            }
        }
    }
}

/// [`Sleeper`] that records requested durations without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    /// The durations requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}
