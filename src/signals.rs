/// Shutdown signal handling.
///
/// The watchdog has no natural end; it runs until SIGINT (Ctrl-C) or SIGTERM.
/// Either signal resolves `shutdown_signal()`, and the caller stops the loop.
use tokio::signal::unix::{signal, SignalKind};

/// Which signal asked us to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

impl Shutdown {
    pub fn name(self) -> &'static str {
        match self {
            Shutdown::Interrupt => "SIGINT",
            Shutdown::Terminate => "SIGTERM",
        }
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// Fails only if the signal handlers cannot be installed.
pub async fn shutdown_signal() -> std::io::Result<Shutdown> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => Ok(Shutdown::Interrupt),
        _ = terminate.recv() => Ok(Shutdown::Terminate),
    }
}
