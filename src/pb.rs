//! Generated protobuf/gRPC bindings from `proto/faas.proto`, compiled at
//! build time by `build.rs` via `protox` + `tonic-build` (no system
//! `protoc` dependency).

pub mod faas {
    tonic::include_proto!("faas");
}
