pub(crate) mod lease;
mod poll_loop;
pub(crate) mod reporter;

pub use poll_loop::{PollContext, poll_loop};
pub use reporter::Reporter;
