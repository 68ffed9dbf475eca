//! netward-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does netward-client do? (for beginners)
//!
//! The client is the control-plane side of a netward installation.  It:
//!
//! 1. Finds sensors on the LAN via mDNS.
//! 2. Pairs with one: the user types the 6-digit code shown on the sensor, the
//!    client proves it knows the code, submits a sealed certificate request,
//!    and stores the certificate it gets back.
//! 3. Keeps a session open: health check, bulk sync of devices, alerts and
//!    decoys, then a live event stream.  When anything breaks it falls back,
//!    waits, and tries again, so the rest of the application only ever sees a
//!    consistent [`application::state::AppState`].

/// Application layer: pairing, session supervision, state, queue, coalescing.
pub mod application;

/// Infrastructure layer: HTTP/WebSocket transport, mDNS, storage, test doubles.
pub mod infrastructure;
