//! Clientbound Bedrock message shapes used to draw placed objects.
//!
//! Only the handful of packets the illusion needs are modelled here:
//! synthetic actors for interaction hitboxes, fake block states for barriers
//! and lights, and actor metadata for the renderable proxy.

pub mod codec;
pub mod packets;
pub mod types;
