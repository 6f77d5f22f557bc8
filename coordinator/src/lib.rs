//! Coordination of a single sampling profiler across the tasks of a parallel job step.
//!
//! Tasks never talk to each other directly. Each selected task registers its pid in a directory
//! on the shared filesystem, the coordinating task waits for all of them, launches the profiler
//! and tears everything down again at the end of the step.

pub mod config;
pub mod distributed;
pub mod executors;
pub mod guard;
pub mod hooks;
pub mod host;
pub mod options;
pub mod ranks;
pub mod session;
pub mod shutdown;
pub mod sync;
