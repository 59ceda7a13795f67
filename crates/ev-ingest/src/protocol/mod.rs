//! Vehicle-cloud subscription protocol: wire schema and client

pub mod client;
pub mod wire;

pub use client::{
    ClientEvent, ConnectionState, DisconnectReason, ProtocolClient, SubscriptionRecord,
    SubscriptionState,
};
pub use wire::{ErrorPayload, Frame, SubscribePayload, VehicleStateWire};
