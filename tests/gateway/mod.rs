//! Gateway scenarios driven through a scripted in-memory transport.

mod heartbeat_tests;
mod lifecycle_tests;
