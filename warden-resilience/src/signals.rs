//! Termination signal handling
//!
//! Installing a [`SignalListener`] replaces the default disposition of SIGHUP,
//! SIGTERM and SIGINT, so a signal the caller chooses not to act on is
//! effectively ignored for as long as the listener lives.

use std::fmt;
use std::io;
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signals a supervised process or a supervisor host reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Hangup,
    Terminate,
    Interrupt,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Hangup => write!(f, "SIGHUP"),
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Listener for SIGHUP, SIGTERM and SIGINT
pub struct SignalListener {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalListener {
    /// Install handlers. Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) -> TerminationSignal {
        let received = tokio::select! {
            _ = self.hangup.recv() => TerminationSignal::Hangup,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
        };
        log::debug!("Received {}", received);
        received
    }

    /// Wait until one of `wanted` arrives, swallowing the others
    pub async fn recv_matching(&mut self, wanted: &[TerminationSignal]) -> TerminationSignal {
        loop {
            let received = self.recv().await;
            if wanted.contains(&received) {
                return received;
            }
            log::info!("Ignoring {}", received);
        }
    }
}
