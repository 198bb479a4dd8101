mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process;

use pool_core::coordination::ReentrancyGuard;
use session::{Session, Transcript};
use sim::SimulatedKit;

const USAGE: &str =
    "Usage: pool-emulator [--listen <addr:port>] [--transcript <path>] [--no-poll]";

static GUARD: ReentrancyGuard = ReentrancyGuard::new();

#[derive(Debug, Default, PartialEq)]
struct Options {
    listen: Option<String>,
    transcript: Option<PathBuf>,
    no_poll: bool,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let mut session = Session::new(SimulatedKit::pool(), &GUARD).map_err(io::Error::other)?;
    if let Some(path) = &options.transcript {
        session = session.with_transcript(Transcript::create(path)?);
    }
    let _poller = if options.no_poll {
        None
    } else {
        Some(session.spawn_poller().map_err(io::Error::other)?)
    };

    match options.listen.as_deref() {
        Some(addr) => serve(&mut session, addr),
        None => console(&mut session),
    }
}

fn parse_options(args: impl IntoIterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" => {
                options.listen = Some(args.next().ok_or("Expected address after --listen")?);
            }
            "--transcript" => {
                let path = args.next().ok_or("Expected path after --transcript")?;
                options.transcript = Some(PathBuf::from(path));
            }
            "--no-poll" => options.no_poll = true,
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}

/// One request per line, e.g. `POST /CMD "ph:r"`.
fn console(session: &mut Session<'_>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Pool station emulator ready. Type `GET /HELP` for routes or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let response = session.handle_request(trimmed)?;
        writeln!(writer, "{response}")?;
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// Serves one request per connection and closes it.
fn serve(session: &mut Session<'_>, addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    eprintln!("listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let result = stream.and_then(|stream| answer(session, stream));
        if let Err(err) = result {
            eprintln!("connection: {err}");
        }
    }
    Ok(())
}

fn answer(session: &mut Session<'_>, stream: TcpStream) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let request = read_request(&mut reader)?;
    let response = session.handle_request(&request)?;
    let mut stream = stream;
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// Reads the header block and a `Content-Length` body.
fn read_request(reader: &mut impl BufRead) -> io::Result<String> {
    let mut request = String::new();
    let mut body_len = 0_usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(request);
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            body_len = value.trim().parse().unwrap_or(0);
        }
        let blank = line.trim().is_empty();
        request.push_str(&line);
        if blank {
            break;
        }
    }

    let mut body = vec![0_u8; body_len];
    reader.read_exact(&mut body)?;
    request.push_str(&String::from_utf8_lossy(&body));
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn parses_flags() {
        let options =
            parse_options(args(&["--listen", "127.0.0.1:8080", "--no-poll"])).expect("options");
        assert_eq!(options.listen.as_deref(), Some("127.0.0.1:8080"));
        assert!(options.no_poll);
        assert_eq!(options.transcript, None);
    }

    #[test]
    fn rejects_unknown_and_incomplete_flags() {
        assert!(parse_options(args(&["--verbose"])).is_err());
        assert!(parse_options(args(&["--transcript"])).is_err());
    }

    #[test]
    fn reads_declared_body() {
        let raw = "POST /POLL HTTP/1.1\r\nContent-Length: 20\r\n\r\n{\"interval_ms\":5000}trailing";
        let request = read_request(&mut raw.as_bytes()).expect("request");
        assert!(request.starts_with("POST /POLL HTTP/1.1\r\n"));
        assert!(request.ends_with("\r\n\r\n{\"interval_ms\":5000}"));
    }

    #[test]
    fn exit_words_ignore_case() {
        assert!(should_terminate("QUIT"));
        assert!(!should_terminate("GET /data"));
    }
}
