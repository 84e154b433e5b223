//! RPC transport boundary (§6): the generated `Destination` gRPC service and
//! the conversions/dispatch that bind it to the domain modules. Nothing
//! outside this module touches a generated protobuf type directly.

pub mod convert;
pub mod service;

pub mod pb {
    tonic::include_proto!("fivetran.destination.surrealdb");
}

pub use service::DestinationService;
