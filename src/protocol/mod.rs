//! Wire protocol: binary frame envelope plus JSON bodies

pub mod frame;
pub mod types;

pub use frame::{decode_frame, encode_frame, read_frame, write_frame};
pub use types::{
    ActiveCheck, ActiveChecksRequest, ResultRecord, ServerResponse, SubmissionAck,
    discovery_value,
};
