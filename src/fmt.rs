//! Logging shims.
//!
//! The macros forward to `defmt` when the `defmt` feature is enabled, to the
//! `log` facade when only `log` is enabled, and expand to nothing otherwise.
//! Format strings must stay within the subset both backends accept (`{}`
//! with `&str`, integers and the crate's error types).
#![allow(unused_macros)]

#[cfg(feature = "defmt")]
macro_rules! trace { ($($arg:tt)*) => { ::defmt::trace!($($arg)*) }; }
#[cfg(feature = "defmt")]
macro_rules! debug { ($($arg:tt)*) => { ::defmt::debug!($($arg)*) }; }
#[cfg(feature = "defmt")]
macro_rules! info { ($($arg:tt)*) => { ::defmt::info!($($arg)*) }; }
#[cfg(feature = "defmt")]
macro_rules! warn { ($($arg:tt)*) => { ::defmt::warn!($($arg)*) }; }
#[cfg(feature = "defmt")]
macro_rules! error { ($($arg:tt)*) => { ::defmt::error!($($arg)*) }; }

#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! trace { ($($arg:tt)*) => { ::log::trace!($($arg)*) }; }
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! debug { ($($arg:tt)*) => { ::log::debug!($($arg)*) }; }
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! info { ($($arg:tt)*) => { ::log::info!($($arg)*) }; }
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! warn { ($($arg:tt)*) => { ::log::warn!($($arg)*) }; }
#[cfg(all(feature = "log", not(feature = "defmt")))]
macro_rules! error { ($($arg:tt)*) => { ::log::error!($($arg)*) }; }

#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! trace { ($($arg:tt)*) => { { let _ = ($($arg)*,); } }; }
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! debug { ($($arg:tt)*) => { { let _ = ($($arg)*,); } }; }
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! info { ($($arg:tt)*) => { { let _ = ($($arg)*,); } }; }
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! warn { ($($arg:tt)*) => { { let _ = ($($arg)*,); } }; }
#[cfg(not(any(feature = "log", feature = "defmt")))]
macro_rules! error { ($($arg:tt)*) => { { let _ = ($($arg)*,); } }; }
