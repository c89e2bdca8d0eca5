//! FTP implementation of the remote session port (RFC 959)
//!
//! One [`FtpSession`] owns one control connection. Every transfer opens a
//! fresh passive-mode data connection (`PASV`), so the session never has to
//! accept inbound connections.
//!
//! Reply handling follows the usual client conventions:
//! - 1xx preliminary, 2xx completion, 3xx "send more", 4xx/5xx refusal
//! - multi-line replies (`NNN-` ... `NNN `) are collected into one [`FtpReply`]
//! - a refusal on STOR/RETR/DELE/RNFR/CWD/MKD is a `false`, not an error
//!
//! Any I/O failure on the control connection drops it, after which
//! [`IRemoteSession::is_connected`] reports `false` and the pool discards the
//! session.

use std::net::{IpAddr, SocketAddr};

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use syncro_core::domain::{SyncError, SyncResult};
use syncro_core::ports::{IRemoteSession, ISessionFactory};

// ============================================================================
// Replies
// ============================================================================

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl FtpReply {
    /// All reply lines joined with newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }
}

/// Parses the 3-digit reply code at the start of a line
fn parse_code(line: &str) -> SyncResult<u16> {
    line.get(..3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| SyncError::Remote(format!("invalid reply line: '{line}'")))
}

/// Extracts the data address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
fn parse_pasv(text: &str) -> SyncResult<SocketAddr> {
    let bad = || SyncError::Remote(format!("cannot parse PASV reply: {text}"));

    let start = text.find('(').ok_or_else(bad)?;
    let end = text[start..].find(')').ok_or_else(bad)? + start;
    let numbers = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad())?;
    if numbers.len() != 6 {
        return Err(bad());
    }

    let ip = IpAddr::from([numbers[0], numbers[1], numbers[2], numbers[3]]);
    let port = u16::from(numbers[4]) * 256 + u16::from(numbers[5]);
    Ok(SocketAddr::new(ip, port))
}

/// Extracts the quoted directory from a `257 "/path" ...` reply
///
/// Doubled quotes inside the path stand for a literal quote.
fn parse_pwd(text: &str) -> SyncResult<String> {
    let start = text
        .find('"')
        .ok_or_else(|| SyncError::Remote(format!("cannot parse PWD reply: {text}")))?;

    let mut path = String::new();
    let mut chars = text[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                path.push('"');
            } else {
                return Ok(path);
            }
        } else {
            path.push(c);
        }
    }
    Err(SyncError::Remote(format!("unterminated PWD reply: {text}")))
}

/// Turns NLST output into bare entry names
///
/// Servers differ on whether `NLST dir` prints `name` or `dir/name`.
fn parse_name_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.rsplit('/').next().unwrap_or(line).to_string())
        .filter(|name| name != "." && name != "..")
        .collect()
}

// ============================================================================
// Session
// ============================================================================

struct Control {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: IpAddr,
}

/// FTP session over a tokio TCP control connection
#[derive(Default)]
pub struct FtpSession {
    control: Option<Control>,
    passive: bool,
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession")
            .field("connected", &self.control.is_some())
            .field("passive", &self.passive)
            .finish()
    }
}

impl FtpSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn control(&mut self) -> SyncResult<&mut Control> {
        self.control
            .as_mut()
            .ok_or_else(|| SyncError::Connectivity("FTP session is not connected".into()))
    }

    /// Drops the control connection and converts the I/O error
    fn broken(&mut self, e: std::io::Error) -> SyncError {
        self.control = None;
        SyncError::Connectivity(format!("FTP control connection lost: {e}"))
    }

    async fn read_reply(&mut self) -> SyncResult<FtpReply> {
        let first = self.read_line().await?;
        let code = parse_code(&first)?;
        let mut lines = vec![first];

        if lines[0].as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let next = self.read_line().await?;
                let done = next.starts_with(&terminator);
                lines.push(next);
                if done {
                    break;
                }
            }
        }

        let reply = FtpReply { code, lines };
        trace!(code = reply.code, "<<< {}", reply.lines.last().map_or("", String::as_str));
        Ok(reply)
    }

    async fn read_line(&mut self) -> SyncResult<String> {
        let control = self.control()?;
        let mut buf = String::new();
        let read = control.reader.read_line(&mut buf).await;
        match read {
            Ok(0) => Err(self.broken(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ))),
            Ok(_) => Ok(buf.trim_end_matches(['\r', '\n']).to_string()),
            Err(e) => Err(self.broken(e)),
        }
    }

    async fn send(&mut self, command: &str) -> SyncResult<()> {
        let control = self.control()?;
        let line = format!("{command}\r\n");
        let written = control.writer.write_all(line.as_bytes()).await;
        if let Err(e) = written {
            return Err(self.broken(e));
        }
        if command.starts_with("PASS ") {
            trace!(">>> PASS ****");
        } else {
            trace!(">>> {}", command);
        }
        Ok(())
    }

    async fn execute(&mut self, command: &str) -> SyncResult<FtpReply> {
        self.send(command).await?;
        self.read_reply().await
    }

    /// Sends `command` and fails unless the reply is 2xx
    async fn expect_completion(&mut self, command: &str) -> SyncResult<FtpReply> {
        let reply = self.execute(command).await?;
        if reply.is_completion() {
            Ok(reply)
        } else {
            Err(SyncError::Remote(format!(
                "{} rejected: {}",
                command.split(' ').next().unwrap_or(command),
                reply.text()
            )))
        }
    }

    async fn open_data(&mut self) -> SyncResult<TcpStream> {
        if !self.passive {
            return Err(SyncError::Remote(
                "active-mode data connections are not supported".into(),
            ));
        }
        let reply = self.expect_completion("PASV").await?;
        let mut addr = parse_pasv(&reply.text())?;
        if addr.ip().is_unspecified() {
            addr.set_ip(self.control()?.peer);
        }
        TcpStream::connect(addr)
            .await
            .map_err(|e| SyncError::Connectivity(format!("data connection to {addr}: {e}")))
    }

    /// Reads the final reply after a data transfer; 2xx means success
    async fn finish_transfer(&mut self, command: &str) -> SyncResult<bool> {
        let done = self.read_reply().await?;
        if !done.is_completion() {
            warn!(command, reply = %done.text(), "Transfer did not complete");
        }
        Ok(done.is_completion())
    }
}

#[async_trait::async_trait]
impl IRemoteSession for FtpSession {
    async fn connect(&mut self, host: &str, port: u16) -> SyncResult<()> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| SyncError::Connectivity(format!("connect to {host}:{port}: {e}")))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| SyncError::Connectivity(e.to_string()))?
            .ip();
        let (reader, writer) = stream.into_split();
        self.control = Some(Control {
            reader: BufReader::new(reader),
            writer,
            peer,
        });

        let greeting = self.read_reply().await?;
        if !greeting.is_completion() {
            self.control = None;
            return Err(SyncError::Connectivity(format!(
                "server refused connection: {}",
                greeting.text()
            )));
        }
        debug!(host, port, "FTP control connection established");
        Ok(())
    }

    async fn login(&mut self, user: &str, password: &str) -> SyncResult<bool> {
        let reply = self.execute(&format!("USER {user}")).await?;
        let reply = if reply.is_intermediate() {
            self.execute(&format!("PASS {password}")).await?
        } else {
            reply
        };

        match reply.code {
            230 | 202 => Ok(true),
            code if code >= 400 => {
                debug!(code, "Login refused");
                Ok(false)
            }
            _ => Err(SyncError::Remote(format!(
                "unexpected login reply: {}",
                reply.text()
            ))),
        }
    }

    async fn set_binary_mode(&mut self) -> SyncResult<()> {
        self.expect_completion("TYPE I").await.map(|_| ())
    }

    async fn set_passive_mode(&mut self) -> SyncResult<()> {
        self.control()?;
        self.passive = true;
        Ok(())
    }

    async fn change_working_directory(&mut self, path: &str) -> SyncResult<bool> {
        Ok(self.execute(&format!("CWD {path}")).await?.is_completion())
    }

    async fn make_directory(&mut self, path: &str) -> SyncResult<bool> {
        Ok(self.execute(&format!("MKD {path}")).await?.is_completion())
    }

    async fn print_working_directory(&mut self) -> SyncResult<String> {
        let reply = self.expect_completion("PWD").await?;
        parse_pwd(&reply.text())
    }

    async fn store_file(
        &mut self,
        remote_name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> SyncResult<bool> {
        let mut data = self.open_data().await?;
        let reply = self.execute(&format!("STOR {remote_name}")).await?;
        if !reply.is_preliminary() {
            debug!(remote_name, reply = %reply.text(), "STOR refused");
            return Ok(false);
        }

        let copied = tokio::io::copy(&mut *source, &mut data).await;
        let _ = data.shutdown().await;
        drop(data);

        let completed = self.finish_transfer("STOR").await?;
        copied?;
        Ok(completed)
    }

    async fn retrieve_file(
        &mut self,
        remote_name: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> SyncResult<bool> {
        let mut data = self.open_data().await?;
        let reply = self.execute(&format!("RETR {remote_name}")).await?;
        if !reply.is_preliminary() {
            debug!(remote_name, reply = %reply.text(), "RETR refused");
            return Ok(false);
        }

        let copied = tokio::io::copy(&mut data, &mut *sink).await;
        drop(data);

        let completed = self.finish_transfer("RETR").await?;
        copied?;
        sink.flush().await?;
        Ok(completed)
    }

    async fn delete_file(&mut self, remote_name: &str) -> SyncResult<bool> {
        Ok(self
            .execute(&format!("DELE {remote_name}"))
            .await?
            .is_completion())
    }

    async fn rename(&mut self, from: &str, to: &str) -> SyncResult<bool> {
        let reply = self.execute(&format!("RNFR {from}")).await?;
        if !reply.is_intermediate() {
            return Ok(false);
        }
        Ok(self.execute(&format!("RNTO {to}")).await?.is_completion())
    }

    async fn list_names(&mut self, path: &str) -> SyncResult<Option<Vec<String>>> {
        let mut data = self.open_data().await?;
        let command = if path.is_empty() {
            "NLST".to_string()
        } else {
            format!("NLST {path}")
        };
        let reply = self.execute(&command).await?;
        if !reply.is_preliminary() {
            // 450/550: nothing to list, or the path does not exist
            return Ok(None);
        }

        let mut listing = String::new();
        let read = data.read_to_string(&mut listing).await;
        drop(data);

        if !self.finish_transfer("NLST").await? {
            return Ok(None);
        }
        read?;
        Ok(Some(parse_name_list(&listing)))
    }

    fn is_connected(&self) -> bool {
        self.control.is_some()
    }

    async fn logout(&mut self) -> SyncResult<()> {
        let reply = self.execute("QUIT").await?;
        debug!(code = reply.code, "Logged out");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut control) = self.control.take() {
            let _ = control.writer.shutdown().await;
        }
        self.passive = false;
    }
}

/// Produces unconnected [`FtpSession`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpSessionFactory;

impl ISessionFactory for FtpSessionFactory {
    fn create(&self) -> Box<dyn IRemoteSession> {
        Box::new(FtpSession::new())
    }
}
