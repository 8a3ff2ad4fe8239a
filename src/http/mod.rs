//! HTTP/1.1 client exchange subsystem.
//!
//! # Data Flow
//! ```text
//! HttpRequest
//!     → handler.rs (abort short-circuit, protocol selection, pool key)
//!     → exchange.rs (acquire socket, write head, 100-continue, pipe body)
//!     → codec.rs (serialize head, parse response head, body framing)
//!     → response.rs (status + headers now, body streamed on demand)
//!     → HttpResponse
//! ```

pub mod codec;
pub mod exchange;
pub mod handler;
pub mod request;
pub mod response;

pub use exchange::ExchangeState;
pub use handler::HttpHandler;
pub use request::{BodyStream, BoxError, HandlerOptions, HttpRequest, Protocol, RequestBody, RequestId};
pub use response::{HttpResponse, ResponseBody};
