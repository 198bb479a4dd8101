#![no_std]

// Shared logic for the pool sensor station.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing traits the other crates implement for
// their bus and clock.

pub mod bus;
pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod ezo;
pub mod registry;
pub mod sequencer;
pub mod station;
