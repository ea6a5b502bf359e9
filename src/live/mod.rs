//! Live duplex voice sessions: the session state machine, the conversational
//! endpoint it talks to, and the per-connection driver task.

pub mod driver;
pub mod endpoint;
pub mod gemini;
pub mod session;

#[cfg(test)]
pub mod testing;
