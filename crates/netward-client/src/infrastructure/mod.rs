//! Infrastructure layer of the client.
//!
//! Contains the OS- and network-facing adapters: the HTTPS and WebSocket
//! transports, mDNS discovery, file storage, and an in-memory sensor for
//! tests.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `netward_core`, but MUST NOT be imported by the `application` layer
//! (tests excepted).

pub mod discovery;
pub mod http;
pub mod mock;
pub mod storage;
pub mod stream;
