//! Wire protocol spoken with the sensor.
//!
//! - **`endpoint`** – Closed catalogue of REST calls.  Method, path and body
//!   are pure functions of the variant, so request construction is testable
//!   without a network.
//! - **`pairing`** – Request and response bodies of the pairing endpoints.
//! - **`frames`** – JSON frames exchanged on the live event stream.
//! - **`events`** – Decoding stream frames into typed [`events::SensorEvent`]s.

pub mod endpoint;
pub mod events;
pub mod frames;
pub mod pairing;

pub use endpoint::{Endpoint, Method, SensorAction};
pub use events::{DecodeError, SensorEvent};
pub use frames::{ClientFrame, StreamFrame};
