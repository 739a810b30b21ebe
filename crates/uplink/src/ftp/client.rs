use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::command::Command;
use super::naming::{self, MAX_NAME_CANDIDATES};
use super::passive::{parse_epsv_port, parse_pasv_port};
use super::reply::{ControlReplyReader, Reply};
use super::{FtpSettings, UploadReport, CHUNK_SIZE, SESSION_ATTEMPTS};
use crate::clock::{epoch_secs, MIN_SANE_EPOCH};
use crate::error::{Result, UplinkError};
use crate::net::{Network, NoWatchdog, Watchdog};

/// Pause between data-connect attempts while the connect deadline runs.
const DATA_CONNECT_RETRY: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Control connection
// ---------------------------------------------------------------------------

/// Feeds the watchdog before every command and after every reply.
struct Control<'w, S> {
    reader: ControlReplyReader<S>,
    watchdog: &'w dyn Watchdog,
}

impl<'w, S: AsyncRead + AsyncWrite + Unpin> Control<'w, S> {
    fn new(stream: S, watchdog: &'w dyn Watchdog) -> Self {
        Self {
            reader: ControlReplyReader::new(stream),
            watchdog,
        }
    }

    async fn send(&mut self, cmd: Command<'_>) -> Result<()> {
        debug!(command = %cmd, "ftp >>");
        self.watchdog.feed();
        let stream = self.reader.get_mut();
        stream.write_all(cmd.to_line().as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn reply(&mut self, limit: Duration, step: &'static str) -> Result<Reply> {
        let reply = self.reader.read_with_deadline(limit, step).await;
        self.watchdog.feed();
        reply
    }

    async fn command(&mut self, cmd: Command<'_>, limit: Duration) -> Result<Reply> {
        self.send(cmd).await?;
        self.reply(limit, cmd.verb()).await
    }

    /// Next non-1xx reply within `limit`.
    async fn completion(&mut self, limit: Duration, step: &'static str) -> Result<Reply> {
        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let reply = self.reply(left, step).await?;
            if !reply.is_preliminary() {
                return Ok(reply);
            }
            debug!(code = reply.code, step, "skipping intermediate reply");
        }
    }

    async fn drain(&mut self, window: Duration, quiet: Duration) {
        self.reader.drain(window, quiet).await;
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FtpClient<N, W = NoWatchdog> {
    network: N,
    settings: FtpSettings,
    watchdog: W,
}

impl<N: Network> FtpClient<N> {
    pub fn new(network: N, settings: FtpSettings) -> Self {
        Self {
            network,
            settings,
            watchdog: NoWatchdog,
        }
    }
}

impl<N: Network, W: Watchdog> FtpClient<N, W> {
    /// Feed `watchdog` on every control exchange, between transfer chunks
    /// and between data connect retries.
    pub fn with_watchdog<W2: Watchdog>(self, watchdog: W2) -> FtpClient<N, W2> {
        FtpClient {
            network: self.network,
            settings: self.settings,
            watchdog,
        }
    }

    pub fn settings(&self) -> &FtpSettings {
        &self.settings
    }

    /// Upload `local` into `remote_dir` (empty = login directory).
    ///
    /// Makes up to [`SESSION_ATTEMPTS`] transfer attempts.  When the control
    /// connection dies between attempts the session logs in again and
    /// negotiates a fresh name, since the server may already hold a partial
    /// file under the previous one.
    pub async fn upload(&self, local: &Path, remote_dir: &str) -> Result<UploadReport> {
        if !local.is_file() {
            return Err(UplinkError::local(
                local,
                io::Error::new(io::ErrorKind::NotFound, "no such file"),
            ));
        }
        if !self.network.is_connected() {
            return Err(UplinkError::Offline);
        }

        let timeouts = self.settings.timeouts;
        let desired = naming::base_name(local);
        info!(
            local = %local.display(),
            dir = remote_dir,
            host = %self.settings.host,
            "ftp upload starting"
        );

        let mut control = Some(self.open_session(remote_dir).await?);
        let mut interim: Option<String> = None;
        let mut stored: Option<(String, u64)> = None;
        let mut last_err = None;

        for attempt in 1..=SESSION_ATTEMPTS {
            if control.is_none() {
                info!(attempt, "control connection lost, logging in again");
                match self.open_session(remote_dir).await {
                    Ok(mut fresh) => {
                        fresh.drain(timeouts.drain(), timeouts.drain_quiet()).await;
                        interim = None;
                        control = Some(fresh);
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "re-login failed");
                        last_err = Some(e);
                        break;
                    }
                }
            }
            let Some(ctrl) = control.as_mut() else {
                break;
            };

            let name = match interim.clone() {
                Some(name) => name,
                None => match self.unique_name(ctrl, &desired).await {
                    Ok(name) => {
                        interim = Some(name.clone());
                        name
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "remote name negotiation failed");
                        if e.is_connection_lost() {
                            control = None;
                        }
                        last_err = Some(e);
                        continue;
                    }
                },
            };

            match self.store(ctrl, local, &name).await {
                Ok(bytes) => {
                    stored = Some((name, bytes));
                    break;
                }
                Err(e) => {
                    warn!(attempt, remote = %name, error = %e, "upload attempt failed");
                    if e.is_connection_lost() {
                        control = None;
                    }
                    last_err = Some(e);
                }
            }
        }

        let Some((remote_name, bytes)) = stored else {
            if let Some(ctrl) = control.as_mut() {
                self.quit(ctrl).await;
            }
            let err = last_err.unwrap_or(UplinkError::ConnectionClosed);
            error!(local = %local.display(), error = %err, "ftp upload failed");
            return Err(err);
        };

        let epoch = epoch_secs();
        if epoch < MIN_SANE_EPOCH {
            warn!(epoch, "wall clock looks unsynchronised; canonical name carries a bogus timestamp");
        }
        let canonical = naming::canonical_name(&desired, &self.settings.device_id, epoch);
        let mut canonical_name = None;
        if let Some(ctrl) = control.as_mut() {
            match self.commit(ctrl, &remote_name, &canonical).await {
                Ok(target) => {
                    info!(from = %remote_name, to = %target, "remote file committed");
                    canonical_name = Some(target);
                }
                Err(e) => {
                    warn!(remote = %remote_name, error = %e, "rename failed, file stays under its interim name")
                }
            }
            self.quit(ctrl).await;
        }

        info!(local = %local.display(), remote = %remote_name, bytes, "ftp upload complete");
        Ok(UploadReport {
            remote_name,
            canonical_name,
            bytes,
        })
    }

    // -- session setup ------------------------------------------------------

    async fn open_session(&self, remote_dir: &str) -> Result<Control<'_, N::Socket>> {
        let s = &self.settings;
        let t = &s.timeouts;

        let stream = match timeout(t.connect(), self.network.connect(&s.host, s.port)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(UplinkError::Timeout("connect")),
        };
        let mut ctrl = Control::new(stream, &self.watchdog);

        let greeting = ctrl.reply(t.reply(), "greeting").await?;
        if greeting.code != 220 {
            return Err(greeting.unexpected("greeting"));
        }

        let user = ctrl.command(Command::User(&s.user), t.reply()).await?;
        if user.is_error() {
            return Err(user.unexpected("USER"));
        }
        if !(200..300).contains(&user.code) {
            let pass = ctrl.command(Command::Pass(&s.pass), t.reply()).await?;
            if pass.is_error() {
                return Err(pass.unexpected("PASS"));
            }
        }

        let ty = ctrl.command(Command::TypeImage, t.reply()).await?;
        if ty.is_error() {
            return Err(ty.unexpected("TYPE"));
        }

        if !remote_dir.is_empty() {
            let cwd = ctrl.command(Command::Cwd(remote_dir), t.reply()).await?;
            if !cwd.is_positive() {
                warn!(dir = remote_dir, reply = cwd.last_line(), "CWD refused, staying in login directory");
            }
        }

        debug!(host = %s.host, "ftp session ready");
        Ok(ctrl)
    }

    // -- name negotiation ---------------------------------------------------

    async fn unique_name(&self, ctrl: &mut Control<'_, N::Socket>, desired: &str) -> Result<String> {
        if !self.file_exists(ctrl, desired).await? {
            debug!(name = desired, "remote name is free");
            return Ok(desired.to_string());
        }
        warn!(name = desired, "remote name already taken, searching for a free one");
        for n in 1..=MAX_NAME_CANDIDATES {
            let candidate = naming::collision_candidate(desired, n);
            if !self.file_exists(ctrl, &candidate).await? {
                info!(name = %candidate, "using alternate remote name");
                return Ok(candidate);
            }
        }
        let fallback = naming::random_candidate(desired);
        warn!(
            name = %fallback,
            tried = MAX_NAME_CANDIDATES,
            "numbered names exhausted, using random suffix"
        );
        Ok(fallback)
    }

    async fn file_exists(&self, ctrl: &mut Control<'_, N::Socket>, name: &str) -> Result<bool> {
        let t = &self.settings.timeouts;

        let size = ctrl.command(Command::Size(name), t.reply()).await?;
        if size.code == 213 {
            return Ok(true);
        }

        let mlst = ctrl.command(Command::Mlst(name), t.reply()).await?;
        if mlst.code == 250 && mlst.lines.iter().any(|l| has_file_fact(l)) {
            return Ok(true);
        }

        self.list_contains(ctrl, name).await
    }

    /// NLST of the working directory, looking for `name`.  Anything short of
    /// a lost control connection counts as "not listed".
    async fn list_contains(&self, ctrl: &mut Control<'_, N::Socket>, name: &str) -> Result<bool> {
        let t = &self.settings.timeouts;

        let port = match self.enter_passive(ctrl).await {
            Ok(port) => port,
            Err(e) if e.is_connection_lost() => return Err(e),
            Err(e) => {
                debug!(error = %e, "NLST lookup skipped");
                return Ok(false);
            }
        };
        let Some(mut data) = self.connect_data(port).await else {
            debug!(port, "NLST lookup skipped, data connect failed");
            return Ok(false);
        };

        ctrl.send(Command::Nlst(".")).await?;
        let mut completed = false;
        match ctrl.reply(t.preliminary(), "NLST").await {
            Ok(r) if r.is_error() => return Ok(false),
            Ok(r) if !r.is_preliminary() => completed = true,
            Ok(_) | Err(UplinkError::Timeout(_)) => {}
            Err(e) => return Err(e),
        }

        let mut listing = Vec::new();
        if timeout(t.listing(), data.read_to_end(&mut listing)).await.is_err() {
            debug!(bytes = listing.len(), "NLST listing timed out");
        }
        drop(data);

        if !completed {
            match ctrl.completion(t.reply(), "NLST").await {
                Err(e) if e.is_connection_lost() => return Err(e),
                _ => {}
            }
        }

        let text = String::from_utf8_lossy(&listing);
        Ok(text
            .lines()
            .map(str::trim)
            .any(|entry| entry.rsplit('/').next() == Some(name)))
    }

    // -- data channel -------------------------------------------------------

    async fn enter_passive(&self, ctrl: &mut Control<'_, N::Socket>) -> Result<u16> {
        let t = &self.settings.timeouts;

        let epsv = ctrl.command(Command::Epsv, t.epsv()).await?;
        if epsv.code == 229 {
            if let Some(port) = epsv.lines.iter().find_map(|l| parse_epsv_port(l)) {
                return Ok(port);
            }
            warn!(reply = epsv.last_line(), "unparseable EPSV reply, trying PASV");
        } else {
            debug!(code = epsv.code, "EPSV refused, trying PASV");
        }

        let pasv = ctrl.command(Command::Pasv, t.pasv()).await?;
        if pasv.code != 227 {
            return Err(pasv.unexpected("PASV"));
        }
        pasv.lines
            .iter()
            .find_map(|l| parse_pasv_port(l))
            .ok_or_else(|| pasv.unexpected("PASV"))
    }

    /// Connect to `port` on the control host, retrying until the connect
    /// deadline.
    async fn connect_data(&self, port: u16) -> Option<N::Socket> {
        let host = &self.settings.host;
        let deadline = Instant::now() + self.settings.timeouts.connect();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            match timeout(left, self.network.connect(host, port)).await {
                Ok(Ok(sock)) => return Some(sock),
                Ok(Err(e)) => debug!(port, error = %e, "data connect failed"),
                Err(_) => return None,
            }
            self.watchdog.feed();
            sleep(DATA_CONNECT_RETRY.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    // -- transfer -----------------------------------------------------------

    /// One transfer attempt of `local` as `name`.
    async fn store(&self, ctrl: &mut Control<'_, N::Socket>, local: &Path, name: &str) -> Result<u64> {
        let t = &self.settings.timeouts;
        let port = self.enter_passive(ctrl).await?;

        let mut data = match self.connect_data(port).await {
            Some(sock) => {
                ctrl.send(Command::Stor(name)).await?;
                sock
            }
            None => {
                debug!(port, "data connect failed, sending STOR first");
                ctrl.send(Command::Stor(name)).await?;
                match self.connect_data(port).await {
                    Some(sock) => sock,
                    None => {
                        self.abort(ctrl).await;
                        return Err(UplinkError::DataChannel {
                            port,
                            reason: "connect failed",
                        });
                    }
                }
            }
        };

        match ctrl.reply(t.preliminary(), "STOR").await {
            Ok(r) if r.is_preliminary() => debug!(code = r.code, "server ready for data"),
            Ok(r) if r.is_error() => return Err(r.unexpected("STOR")),
            Ok(r) => warn!(code = r.code, "unexpected reply before data, streaming anyway"),
            Err(UplinkError::Timeout(_)) => warn!("no 150/125 from server, streaming anyway"),
            Err(e) => return Err(e),
        }

        let sent = match self.stream_file(&mut data, local, port).await {
            Ok(sent) => sent,
            Err(e) => {
                drop(data);
                self.abort(ctrl).await;
                return Err(e);
            }
        };
        drop(data);

        let done = ctrl.completion(t.transfer_end(), "STOR").await?;
        if done.code == 226 || done.code == 250 {
            debug!(bytes = sent, remote = name, "transfer acknowledged");
            Ok(sent)
        } else {
            self.abort(ctrl).await;
            Err(done.unexpected("STOR"))
        }
    }

    async fn stream_file(&self, data: &mut N::Socket, local: &Path, port: u16) -> Result<u64> {
        let stall = self.settings.timeouts.stall();
        let mut file = std::fs::File::open(local).map_err(|e| UplinkError::local(local, e))?;
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut sent = 0u64;

        loop {
            let n = file.read(&mut chunk).map_err(|e| UplinkError::local(local, e))?;
            if n == 0 {
                break;
            }
            let mut off = 0;
            while off < n {
                match timeout(stall, data.write(&chunk[off..n])).await {
                    Ok(Ok(0)) => {
                        return Err(UplinkError::DataChannel {
                            port,
                            reason: "closed by server",
                        })
                    }
                    Ok(Ok(w)) => {
                        off += w;
                        sent += w as u64;
                    }
                    Ok(Err(e)) => {
                        debug!(port, error = %e, "data write failed");
                        return Err(UplinkError::DataChannel {
                            port,
                            reason: "write failed",
                        });
                    }
                    Err(_) => return Err(UplinkError::TransferStall { sent }),
                }
            }
            self.watchdog.feed();
            tokio::task::yield_now().await;
        }

        match timeout(stall, data.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "data shutdown"),
            Err(_) => return Err(UplinkError::TransferStall { sent }),
        }
        Ok(sent)
    }

    async fn abort(&self, ctrl: &mut Control<'_, N::Socket>) {
        let t = &self.settings.timeouts;
        if let Err(e) = ctrl.send(Command::Abor).await {
            debug!(error = %e, "ABOR not sent");
            return;
        }
        match ctrl.reply(t.abort(), "ABOR").await {
            Ok(r) => debug!(code = r.code, "ABOR answered"),
            Err(e) => debug!(error = %e, "no ABOR reply"),
        }
        ctrl.drain(t.drain(), t.drain_quiet()).await;
    }

    // -- commit and teardown ------------------------------------------------

    /// Rename the uploaded file to `canonical`, or to the first free `+N`
    /// variant of it when an earlier delivery already holds that name.
    async fn commit(&self, ctrl: &mut Control<'_, N::Socket>, from: &str, canonical: &str) -> Result<String> {
        let target = self.unique_name(ctrl, canonical).await?;
        self.rename(ctrl, from, &target).await?;
        Ok(target)
    }

    async fn rename(&self, ctrl: &mut Control<'_, N::Socket>, from: &str, to: &str) -> Result<()> {
        let t = &self.settings.timeouts;
        let rnfr = ctrl.command(Command::Rnfr(from), t.reply()).await?;
        if rnfr.code != 350 {
            return Err(rnfr.unexpected("RNFR"));
        }
        let rnto = ctrl.command(Command::Rnto(to), t.reply()).await?;
        if rnto.code != 250 {
            return Err(rnto.unexpected("RNTO"));
        }
        Ok(())
    }

    async fn quit(&self, ctrl: &mut Control<'_, N::Socket>) {
        let limit = self.settings.timeouts.abort();
        if ctrl.send(Command::Quit).await.is_ok() {
            let _ = ctrl.reply(limit, "QUIT").await;
        }
    }
}

/// MLST fact lists look like `Type=file;Size=12; name`.
fn has_file_fact(line: &str) -> bool {
    line.to_ascii_lowercase().contains("type=file;")
}

// ===========================================================================
// Tests
// ===========================================================================
