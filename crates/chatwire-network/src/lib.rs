//! Network side of capture: endpoint classification, the interception port
//! wrapping the host's fetch primitive, and streamed completion decoding.

pub mod endpoints;
pub mod interceptor;
pub mod port;
pub mod stream;
pub mod tee;

pub use endpoints::{Classification, EndpointPattern, EndpointTable, Matcher};
pub use interceptor::Interceptor;
pub use port::{
    Body, ByteStream, FetchDelegate, FetchFuture, HttpRequest, HttpResponse, InterceptionPort,
    ScriptedFetch, ScriptedResponse,
};
pub use stream::{dialect_for, Outcome, StreamDecoder, StreamDialect};
pub use tee::clone_body;
