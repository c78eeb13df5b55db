// Generated gRPC types for the donation ledger service

pub mod donation_ledger {
    tonic::include_proto!("pesona.payments.v1");
}

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("donation_ledger_descriptor");
