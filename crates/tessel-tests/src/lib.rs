//! Integration test crate for Tessel.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! Everything runs on the headless backend, so no GPU is required.

#[cfg(test)]
mod support;

#[cfg(test)]
mod context;

#[cfg(test)]
mod readback;

#[cfg(test)]
mod budget;
