mod headers;
mod line;
mod request;
mod response;

pub(crate) use request::{RequestHead, encode_request_head, read_request_head};
pub(crate) use response::{encode_response_head, read_response_body, read_response_head};
