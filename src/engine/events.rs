use super::fetch::FetchCompletion;
use crate::player::ConnectError;

/// Everything that can change engine state arrives as one of these.
#[derive(Debug)]
pub enum Event {
    Command(Command),
    /// Result of a connect attempt spawned by the engine. Results whose
    /// ticket is no longer current are dropped.
    Connected {
        ticket: u64,
        result: Result<(), ConnectError>,
    },
    LyricsFetched(FetchCompletion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    Shutdown,
}
