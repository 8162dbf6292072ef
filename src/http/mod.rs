//! HTTP/1.1 message types and wire framing.
//!
//! - [`request`] / [`response`]: the messages the engine consumes and produces
//! - [`orderedheaders`]: order-preserving header multimap
//! - [`codec`]: request encoding and response decoding
//! - [`digestauth`]: Digest challenge parsing and response computation

pub mod codec;
pub mod digestauth;
pub mod orderedheaders;
pub mod request;
pub mod requestbody;
pub mod response;
pub mod responsebody;

pub use codec::{Http1Codec, ResponseHead};
pub use digestauth::DigestChallenge;
pub use orderedheaders::OrderedHeaderMap;
pub use request::HttpRequest;
pub use requestbody::RequestBody;
pub use response::HttpResponse;
pub use responsebody::ResponseBody;
