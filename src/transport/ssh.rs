//! SSH session to the doorbell (libssh2 via `ssh2`)

use secrecy::{ExposeSecret, SecretString};
use ssh2::Session;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{ExecOutput, RemoteSession, SessionConnector, SessionError};
use crate::config::SshConfig;

const CHUNK_SIZE: usize = 16 * 1024;
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Opens [`SshSession`]s using the configured host and credentials
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

impl SessionConnector for SshConnector {
    fn open(&self) -> Result<Box<dyn RemoteSession>, SessionError> {
        Ok(Box::new(SshSession::open(&self.config)?))
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}

pub struct SshSession {
    session: Option<Session>,
    target: String,
}

impl SshSession {
    /// Connect, handshake and authenticate with the password held in the
    /// environment variable named by `config.password_env`.
    pub fn open(config: &SshConfig) -> Result<Self, SessionError> {
        let password = read_password(&config.password_env)?;
        let target = format!("{}:{}", config.host, config.port);

        let stream = connect_tcp(&target, Duration::from_secs(config.connect_timeout_secs))?;

        let mut session = Session::new().map_err(|e| SessionError::Connect {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        session.set_tcp_stream(stream);
        session.handshake().map_err(|e| SessionError::Connect {
            target: target.clone(),
            reason: format!("handshake: {e}"),
        })?;

        session
            .userauth_password(&config.user, password.expose_secret())
            .map_err(|e| SessionError::Auth(e.to_string()))?;
        if !session.authenticated() {
            return Err(SessionError::Auth(format!("user '{}' rejected", config.user)));
        }

        info!("[SSH] Connected to {} as {}", target, config.user);

        Ok(Self {
            session: Some(session),
            target,
        })
    }

    fn session(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::Closed)
    }
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str) -> Result<ExecOutput, SessionError> {
        let session = self.session()?;
        let exec_err = |e: ssh2::Error| SessionError::Exec(e.to_string());

        let mut channel = session.channel_session().map_err(exec_err)?;
        channel.exec(command).map_err(exec_err)?;

        session.set_blocking(false);
        let drained = drain_interleaved(
            &mut channel.stream(0),
            &mut channel.stderr(),
            || channel.eof(),
            EXEC_POLL_INTERVAL,
        );
        session.set_blocking(true);
        let (stdout, stderr) =
            drained.map_err(|e| SessionError::Exec(format!("read output: {e}")))?;

        channel.wait_close().map_err(exec_err)?;
        let exit_status = channel.exit_status().map_err(exec_err)?;

        let output = ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        };

        if exit_status != 0 {
            debug!("[SSH] Command failed: {}", output);
            return Err(SessionError::NonZeroExit { output });
        }
        Ok(output)
    }

    fn upload_file(
        &mut self,
        local: &Path,
        remote_dir: &str,
        mode: i32,
    ) -> Result<(), SessionError> {
        let session = self.session()?;

        let name = local
            .file_name()
            .ok_or_else(|| SessionError::transfer(local, "path has no file name"))?;
        let remote_path = format!(
            "{}/{}",
            remote_dir.trim_end_matches('/'),
            name.to_string_lossy()
        );

        let mut file = File::open(local).map_err(|e| SessionError::transfer(local, e))?;
        let size = file
            .metadata()
            .map_err(|e| SessionError::transfer(local, e))?
            .len();

        let mut channel = session
            .scp_send(Path::new(&remote_path), mode, size, None)
            .map_err(|e| SessionError::transfer(local, e))?;

        io::copy(&mut file, &mut channel).map_err(|e| SessionError::transfer(local, e))?;

        channel
            .send_eof()
            .and_then(|_| channel.wait_eof())
            .and_then(|_| channel.close())
            .and_then(|_| channel.wait_close())
            .map_err(|e| SessionError::transfer(local, e))?;

        debug!("[SSH] Uploaded {} -> {} ({} bytes)", local.display(), remote_path, size);
        Ok(())
    }

    fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<(), SessionError> {
        let session = self.session()?;

        let (mut channel, stat) = session
            .scp_recv(Path::new(remote_path))
            .map_err(|e| SessionError::transfer(remote_path, e))?;

        let mut file = File::create(local).map_err(|e| SessionError::transfer(local, e))?;
        let written = copy_declared_len(&mut channel, &mut file, stat.size())
            .map_err(|e| SessionError::transfer(remote_path, e))?;
        file.flush().map_err(|e| SessionError::transfer(local, e))?;

        // Best effort; the payload is already on disk
        let _ = channel.send_eof();
        let _ = channel.wait_eof();
        let _ = channel.close();
        let _ = channel.wait_close();

        debug!("[SSH] Downloaded {} -> {} ({} bytes)", remote_path, local.display(), written);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect(None, "closing", None) {
                warn!("[SSH] Disconnect from {} failed: {}", self.target, e);
            }
            debug!("[SSH] Session to {} closed", self.target);
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_password(var: &str) -> Result<SecretString, SessionError> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        Ok(_) => Err(SessionError::Auth(format!("environment variable {var} is empty"))),
        Err(_) => Err(SessionError::Auth(format!("environment variable {var} is not set"))),
    }
}

fn connect_tcp(target: &str, timeout: Duration) -> Result<TcpStream, SessionError> {
    let connect_err = |reason: String| SessionError::Connect {
        target: target.to_string(),
        reason,
    };

    let addrs = target
        .to_socket_addrs()
        .map_err(|e| connect_err(format!("resolve: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(connect_err(match last_error {
        Some(e) => e.to_string(),
        None => "no addresses resolved".to_string(),
    }))
}

/// Read stdout and stderr in turn until `eof` reports the channel finished.
///
/// Both readers must be non-blocking. A stream left unread fills the channel
/// window and stalls the remote command, so neither may be drained first.
fn drain_interleaved<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut eof: impl FnMut() -> bool,
    idle: Duration,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut out = Vec::new();
    let mut err = Vec::new();

    loop {
        let got_out = read_available(stdout, &mut buffer, &mut out)?;
        let got_err = read_available(stderr, &mut buffer, &mut err)?;
        if eof() {
            read_available(stdout, &mut buffer, &mut out)?;
            read_available(stderr, &mut buffer, &mut err)?;
            return Ok((out, err));
        }
        if got_out == 0 && got_err == 0 {
            std::thread::sleep(idle);
        }
    }
}

/// Append whatever `reader` has ready; stops at `WouldBlock` or end of stream
fn read_available<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    sink: &mut Vec<u8>,
) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match reader.read(buffer) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink.extend_from_slice(&buffer[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Copy exactly `declared` bytes from `reader` to `writer`.
///
/// The doorbell's scp appends a NUL terminator inside the declared size of
/// some files. When a read returns exactly the remaining byte count and ends
/// in NUL, that byte is dropped.
fn copy_declared_len<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    declared: u64,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut remaining = declared;
    let mut written = 0u64;

    while remaining > 0 {
        let want = remaining.min(buffer.len() as u64) as usize;
        let n = reader.read(&mut buffer[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended with {remaining} bytes outstanding"),
            ));
        }

        let mut chunk = &buffer[..n];
        if n as u64 == remaining && chunk.last() == Some(&0) {
            chunk = &chunk[..n - 1];
        }

        writer.write_all(chunk)?;
        written += chunk.len() as u64;
        remaining -= n as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    #[test]
    fn test_trailing_nul_stripped() {
        let mut reader = Cursor::new(b"{\"a\":1}\0".to_vec());
        let mut out = Vec::new();

        let written = copy_declared_len(&mut reader, &mut out, 8).unwrap();

        assert_eq!(out, b"{\"a\":1}");
        assert_eq!(written, 7);
    }

    #[test]
    fn test_interior_nul_kept() {
        let data = vec![0u8, 1, 0, 2];
        let mut reader = Cursor::new(data.clone());
        let mut out = Vec::new();

        copy_declared_len(&mut reader, &mut out, 4).unwrap();

        assert_eq!(out, data);
    }

    #[test]
    fn test_stops_at_declared_size() {
        let mut reader = Cursor::new(b"abcdef".to_vec());
        let mut out = Vec::new();

        copy_declared_len(&mut reader, &mut out, 3).unwrap();

        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_short_stream_is_error() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let mut out = Vec::new();

        let err = copy_declared_len(&mut reader, &mut out, 10).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    /// Non-blocking reader fed from a fixed list of reads
    struct Chunks(VecDeque<Option<Vec<u8>>>);

    impl Chunks {
        fn new(reads: Vec<Option<&[u8]>>) -> Self {
            Self(reads.into_iter().map(|r| r.map(<[u8]>::to_vec)).collect())
        }
    }

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.0.push_front(Some(data[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(None) | None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn test_stderr_read_while_stdout_is_quiet() {
        let noisy = vec![b'e'; CHUNK_SIZE * 4];
        let mut stdout = Chunks::new(vec![None, None, None, Some(&b"OK\n"[..])]);
        let mut stderr = Chunks::new(vec![
            Some(noisy.as_slice()),
            None,
            Some(&b"ERROR step=restart rc=1\n"[..]),
        ]);
        let mut polls = 0;

        let (out, err) = drain_interleaved(
            &mut stdout,
            &mut stderr,
            || {
                polls += 1;
                polls > 4
            },
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(out, b"OK\n");
        assert_eq!(err.len(), noisy.len() + 24);
        assert!(err.ends_with(b"ERROR step=restart rc=1\n"));
    }

    #[test]
    fn test_read_error_propagates() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::ConnectionReset.into())
            }
        }

        let err = drain_interleaved(
            &mut Chunks::new(vec![]),
            &mut Broken,
            || false,
            Duration::ZERO,
        )
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_missing_password_is_auth_error() {
        let config = SshConfig {
            password_env: "DOORBELL_TEST_PASSWORD_THAT_IS_NOT_SET".into(),
            ..SshConfig::default()
        };

        let err = SshSession::open(&config).err().unwrap();

        assert!(matches!(err, SessionError::Auth(_)));
    }
}
