//! Application layer of the client.
//!
//! - **`transport`** – The traits the application needs from the network
//!   (`SensorTransport`, `EventStream`, `PairingTransport`) and their error
//!   type.  Implementations live in `infrastructure`.
//!
//! - **`state`** – `StateStore`, the single container of app-visible state.
//!   Readers subscribe to snapshots; only the session writes the connection
//!   state.
//!
//! - **`action_queue`** – Bounded FIFO of user actions waiting for the
//!   session to come back.
//!
//! - **`coalescer`** – Batches bursts of stream events into one state update.
//!
//! - **`timers`** – Independently cancellable background task slots.
//!
//! - **`session`** – `SessionManager`: connect, sync, stream, reconnect.
//!
//! - **`pairing`** – The pairing handshake and the credential store seam.

pub mod action_queue;
pub mod coalescer;
pub mod pairing;
pub mod session;
pub mod state;
pub mod timers;
pub mod transport;
