//! One user-initiated trace: probe, then geolocate, off the UI thread
//!
//! Progress flows back over an unbounded channel so the worker never waits
//! on the foreground. The coordinate list is only delivered once the whole
//! pipeline has succeeded.

use std::fmt;
use std::io;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{error, info};

use crate::geo::{GeoCoordinate, GeoResolver, ResolveFailure};
use crate::probe::{PathProbe, ProbeError};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Probe failure: {0}")]
    Probe(#[from] ProbeError),

    #[error("Resolver failure: {0}")]
    Resolve(#[from] ResolveFailure),

    #[error("trace worker stopped unexpectedly")]
    WorkerLost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Geolocating,
    Drawing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Geolocating => f.write_str("Geolocating IP addresses..."),
            Stage::Drawing => f.write_str("Drawing map..."),
        }
    }
}

#[derive(Debug)]
pub enum TraceEvent {
    Line(String),
    Stage(Stage),
    Finished(Result<Vec<GeoCoordinate>, TraceError>),
}

pub struct TraceOrchestrator {
    probe: PathProbe,
    resolver: GeoResolver,
}

impl TraceOrchestrator {
    pub fn new(probe: PathProbe, resolver: GeoResolver) -> Self {
        Self { probe, resolver }
    }

    /// Run the whole pipeline on the calling thread
    pub fn run(&self, target: &str, events: &Sender<TraceEvent>) -> Result<Vec<GeoCoordinate>, TraceError> {
        info!(target, "trace started");
        let mut run = self.probe.spawn(target)?;
        for line in &mut run {
            let line = line.map_err(ProbeError::from)?;
            // A closed receiver only means nobody is watching any more
            let _ = events.send(TraceEvent::Line(line));
        }
        let hops = run.finish()?;

        let _ = events.send(TraceEvent::Stage(Stage::Geolocating));
        let coords = self.resolver.resolve(&hops)?;

        let _ = events.send(TraceEvent::Stage(Stage::Drawing));
        info!(hops = hops.len(), located = coords.len(), "trace finished");
        Ok(coords)
    }

    /// Start a trace on a worker thread
    pub fn spawn(self: &Arc<Self>, target: String) -> io::Result<TraceHandle> {
        let (tx, rx) = mpsc::channel();
        let orchestrator = Arc::clone(self);
        thread::Builder::new()
            .name("trace-worker".into())
            .spawn(move || {
                let result = orchestrator.run(&target, &tx);
                if let Err(e) = &result {
                    error!(error = %e, "trace failed");
                }
                let _ = tx.send(TraceEvent::Finished(result));
            })?;

        Ok(TraceHandle { rx, finished: false })
    }
}

/// Foreground side of a running trace. Dropping it abandons the result.
pub struct TraceHandle {
    rx: Receiver<TraceEvent>,
    finished: bool,
}

impl TraceHandle {
    /// Everything the worker has sent so far, in order. Never blocks.
    pub fn poll(&mut self) -> Vec<TraceEvent> {
        let mut events = Vec::new();
        while !self.finished {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.finished = matches!(event, TraceEvent::Finished(_));
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    events.push(TraceEvent::Finished(Err(TraceError::WorkerLost)));
                }
            }
        }
        events
    }

    /// Block until the worker finishes, handing each event to `on_event`
    pub fn wait<F>(mut self, mut on_event: F) -> Result<Vec<GeoCoordinate>, TraceError>
    where
        F: FnMut(&TraceEvent),
    {
        while !self.finished {
            let event = match self.rx.recv() {
                Ok(event) => event,
                Err(_) => TraceEvent::Finished(Err(TraceError::WorkerLost)),
            };
            on_event(&event);
            if let TraceEvent::Finished(result) = event {
                self.finished = true;
                return result;
            }
        }
        Err(TraceError::WorkerLost)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
