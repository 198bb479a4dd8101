//! Request framing: `METHOD PATH [VERSION] [BODY]` plus an optional body block.
//!
//! The request line is parsed with `winnow`. Two framings are accepted: the
//! HTTP shape (request line, headers, blank line, body) and the single-line
//! console shape where the body follows the path on the same line.

use core::fmt;

use winnow::ascii::space1;
use winnow::combinator::{alt, opt, preceded};
use winnow::ModalResult;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

/// Request method understood by the dispatcher.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound request borrowed from the transport buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Request<'a> {
    pub method: Method,
    /// Path without the query string.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub version: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    pub const fn new(method: Method, path: &'a str, body: &'a [u8]) -> Self {
        Self {
            method,
            path,
            query: None,
            version: None,
            body,
        }
    }
}

/// Request line rejection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestLineError {
    Empty,
    UnknownMethod,
    MissingPath,
}

impl fmt::Display for RequestLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestLineError::Empty => write!(f, "empty request"),
            RequestLineError::UnknownMethod => write!(f, "expected GET or POST"),
            RequestLineError::MissingPath => write!(f, "expected a request path"),
        }
    }
}

/// Parses a request in either framing.
///
/// # Errors
///
/// Returns a [`RequestLineError`] when the first line is not a request line.
pub fn parse_request(text: &str) -> Result<Request<'_>, RequestLineError> {
    let text = text.trim_start_matches(['\r', '\n']);
    let (line, remainder) = match text.split_once('\n') {
        Some((line, remainder)) => (line, remainder),
        None => (text, ""),
    };

    let mut request = parse_request_line(line.trim_end_matches('\r'))?;
    if request.body.is_empty() {
        request.body = block_body(remainder).as_bytes();
    }
    Ok(request)
}

/// Parses a single request line, including an inline body.
///
/// # Errors
///
/// See [`parse_request`].
pub fn parse_request_line(line: &str) -> Result<Request<'_>, RequestLineError> {
    let mut input = line.trim();
    if input.is_empty() {
        return Err(RequestLineError::Empty);
    }

    let method = run(method, &mut input, RequestLineError::UnknownMethod)?;
    run(space1, &mut input, RequestLineError::MissingPath)?;
    let target = run(target, &mut input, RequestLineError::MissingPath)?;
    let version = run(
        opt(preceded(space1, version)),
        &mut input,
        RequestLineError::MissingPath,
    )?;
    let body = run(
        opt(preceded(space1, rest)),
        &mut input,
        RequestLineError::MissingPath,
    )?;

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    Ok(Request {
        method,
        path,
        query,
        version,
        body: body.unwrap_or("").trim().as_bytes(),
    })
}

fn run<'a, O, P>(
    mut parser: P,
    input: &mut &'a str,
    error: RequestLineError,
) -> Result<O, RequestLineError>
where
    P: Parser<&'a str, O, ErrMode<ContextError>>,
{
    match parser.parse_next(input) {
        Ok(value) => Ok(value),
        Err(ErrMode::Backtrack(_) | ErrMode::Cut(_) | ErrMode::Incomplete(_)) => Err(error),
    }
}

fn method(input: &mut &str) -> ModalResult<Method> {
    alt(("GET".value(Method::Get), "POST".value(Method::Post))).parse_next(input)
}

fn target<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(
        winnow::combinator::peek('/'),
        take_while(1.., |c: char| !c.is_ascii_whitespace()),
    )
    .parse_next(input)
}

fn version<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    ("HTTP/", take_while(1.., |c: char| c.is_ascii_digit() || c == '.'))
        .take()
        .parse_next(input)
}

fn block_body(remainder: &str) -> &str {
    let body = ["\r\n\r\n", "\n\n"]
        .iter()
        .filter_map(|separator| {
            remainder
                .find(separator)
                .map(|at| &remainder[at + separator.len()..])
        })
        .next()
        .unwrap_or(remainder);
    body.trim()
}
