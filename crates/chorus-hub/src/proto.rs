//! Generated gRPC code for the speaker protocol.
//!
//! This module includes the Rust code generated from
//! `proto/chorus_speaker.proto`.
//!
//! ## Generated Items
//! - `speaker_service_server::{SpeakerService, SpeakerServiceServer}` - the
//!   hub-side service trait and tonic wrapper
//! - `speaker_service_client::SpeakerServiceClient` - client stub used by
//!   tests and tooling
//! - Message structs (`SpeakerRegistration`, `DeviceState`, ...)

// Include the generated code from build.rs
tonic::include_proto!("chorus.speaker.v1");
