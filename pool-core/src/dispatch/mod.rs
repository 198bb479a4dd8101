//! Request dispatcher.
//!
//! Handlers are consulted in registration order; the first one that claims a
//! request produces the response and later handlers never see it. Requests no
//! handler claims come back as [`DispatchOutcome::Unhandled`] and the transport
//! decides how to close them.

pub mod catalog;
pub mod device;
pub mod request;
pub mod station;

use core::fmt::{self, Write as _};
use core::str;

use heapless::{String, Vec};
use serde::Serialize;

pub use device::{DeviceController, Readings};
pub use request::{Method, Request, RequestLineError, parse_request, parse_request_line};
pub use station::{StationController, StationHandler, station_dispatcher};

/// Largest serialized response body.
pub const MAX_RESPONSE_BODY: usize = 512;
/// Longest error message carried in a failure response.
pub const MAX_MESSAGE_LEN: usize = 128;

/// Status attached to a handled request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseStatus {
    Ok,
    NotFound,
    InternalError,
    Busy,
}

impl ResponseStatus {
    pub const fn code(self) -> u16 {
        match self {
            ResponseStatus::Ok => 200,
            ResponseStatus::NotFound => 404,
            ResponseStatus::InternalError => 500,
            ResponseStatus::Busy => 503,
        }
    }

    pub const fn reason(self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::NotFound => "Not Found",
            ResponseStatus::InternalError => "Internal Server Error",
            ResponseStatus::Busy => "Service Unavailable",
        }
    }
}

#[derive(Serialize)]
struct Failure<'a> {
    success: bool,
    message: &'a str,
}

/// Structured response produced by a handler.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    body: Vec<u8, MAX_RESPONSE_BODY>,
}

impl Response {
    /// Response without a body.
    pub const fn empty(status: ResponseStatus) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// Serializes `value` as the JSON body.
    ///
    /// A value that does not fit the body buffer turns into a 500 response.
    pub fn json<T>(status: ResponseStatus, value: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        let mut buffer = [0_u8; MAX_RESPONSE_BODY];
        match serde_json_core::to_slice(value, &mut buffer) {
            Ok(len) => Self {
                status,
                body: Vec::from_slice(&buffer[..len]).unwrap_or_default(),
            },
            Err(_) => Self::failure(ResponseStatus::InternalError, "response too large"),
        }
    }

    /// `{"success":false,"message":...}` with the given status.
    pub fn failure(status: ResponseStatus, message: impl fmt::Display) -> Self {
        let mut text: String<MAX_MESSAGE_LEN> = String::new();
        // Overlong messages are cut at the buffer limit.
        let _ = write!(text, "{message}");

        let mut buffer = [0_u8; MAX_RESPONSE_BODY];
        let failure = Failure {
            success: false,
            message: text.as_str(),
        };
        let len = serde_json_core::to_slice(&failure, &mut buffer).unwrap_or(0);
        Self {
            status,
            body: Vec::from_slice(&buffer[..len]).unwrap_or_default(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_str(&self) -> &str {
        str::from_utf8(&self.body).unwrap_or("")
    }

    /// Writes the response in HTTP/1.1 form with a closing connection.
    ///
    /// # Errors
    ///
    /// Propagates errors from `out`.
    pub fn write_http<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        write!(
            out,
            "HTTP/1.1 {} {}\r\nContent-type:text/json\r\nConnection: close\r\n\r\n{}",
            self.status.code(),
            self.status.reason(),
            self.body_str()
        )
    }
}

/// A claim-or-decline request handler over a shared context `C`.
#[allow(async_fn_in_trait)]
pub trait RequestHandler<C> {
    /// Returns a response when the handler claims `request`, `None` to decline.
    async fn try_handle(&mut self, request: &Request<'_>, context: &mut C) -> Option<Response>;
}

/// Result of routing one request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Handled(Response),
    Unhandled,
}

/// Ordered list of up to `N` handlers.
pub struct Dispatcher<H, const N: usize> {
    handlers: Vec<H, N>,
}

impl<H, const N: usize> Dispatcher<H, N> {
    pub const fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Appends a handler after every handler registered so far.
    ///
    /// # Errors
    ///
    /// Hands the handler back when the list is full.
    pub fn register(&mut self, handler: H) -> Result<(), H> {
        self.handlers.push(handler)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offers `request` to each handler in order until one claims it.
    pub async fn dispatch<C>(&mut self, request: &Request<'_>, context: &mut C) -> DispatchOutcome
    where
        H: RequestHandler<C>,
    {
        for handler in &mut self.handlers {
            if let Some(response) = handler.try_handle(request, context).await {
                return DispatchOutcome::Handled(response);
            }
        }
        DispatchOutcome::Unhandled
    }
}

impl<H, const N: usize> Default for Dispatcher<H, N> {
    fn default() -> Self {
        Self::new()
    }
}
