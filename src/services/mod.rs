pub mod aggregate;
pub mod extract;
pub mod limiter;
pub mod queue;
pub mod session;
