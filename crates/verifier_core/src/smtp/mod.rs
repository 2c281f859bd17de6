//! SMTP probing: session runner, response classification, and the
//! multi-port racer.

pub mod classifier;
pub mod racer;
pub mod session;

pub use racer::race;
pub use session::{run_session, SessionOutcome, SmtpReply};
