//! Behavioural suites for the protocol crate.
