pub mod common;
pub mod draft;
pub mod queue;
pub mod submit;
pub mod watch;
