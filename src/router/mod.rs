pub mod rpc;
pub mod status;
