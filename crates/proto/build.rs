use tonic_build::manual::{Builder, Method, Service};

/// One unary method of `abd.kv.ReplicaService`, prost-encoded.
fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::kv::{}", input))
        .output_type(format!("crate::kv::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    // Messages are declared with `#[derive(prost::Message)]` in src/lib.rs;
    // only the service plumbing is generated here.
    let replica_service = Service::builder()
        .name("ReplicaService")
        .package("abd.kv")
        .method(unary(
            "get_most_recent_timestamp",
            "GetMostRecentTimestamp",
            "GetMostRecentTimestampRequest",
            "GetMostRecentTimestampResponse",
        ))
        .method(unary(
            "local_write",
            "LocalWrite",
            "LocalWriteRequest",
            "LocalWriteResponse",
        ))
        .method(unary(
            "local_read",
            "LocalRead",
            "LocalReadRequest",
            "LocalReadResponse",
        ))
        .build();

    Builder::new().compile(&[replica_service]);

    println!("cargo:rerun-if-changed=build.rs");
}
