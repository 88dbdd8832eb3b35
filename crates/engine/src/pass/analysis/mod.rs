//! Analysis passes, which compute facts about the IR that the detectors build
//! on rather than reporting issues themselves.

pub mod summaries;
