#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
extern crate panic_halt;

mod clock;
mod link;

#[cfg(target_os = "none")]
mod hw;
#[cfg(target_os = "none")]
mod runtime;
#[cfg(target_os = "none")]
mod usb;

#[cfg(not(target_os = "none"))]
fn main() {}
