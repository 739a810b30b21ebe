//! Scripted FTP server on loopback for exercising the client end to end.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const ACCEPT_TIMEOUT: Duration = Duration::from_secs(3);

/// Knobs for misbehaving on purpose.
#[derive(Debug, Clone, Default)]
pub struct ServerBehavior {
    /// Files present before the first session, with empty bodies.
    pub existing: Vec<String>,
    pub multiline_greeting: bool,
    /// USER alone logs in (230), PASS is never asked for.
    pub user_logs_in: bool,
    pub reject_login: bool,
    pub reject_cwd: bool,
    pub disable_epsv: bool,
    pub disable_size: bool,
    pub disable_size_mlst: bool,
    /// Advertise passive ports nobody listens on.
    pub refuse_data: bool,
    pub reject_rename: bool,
    /// Answer this many STORs with 451 after reading the data.
    pub fail_first_stores: usize,
    /// Drop the control connection on the first STOR.
    pub hangup_on_first_store: bool,
    /// Accept the data connection and never read from it.
    pub stall_data: bool,
}

#[derive(Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    commands: Vec<String>,
    stores_failed: usize,
    hung_up: bool,
}

pub struct FakeFtpServer {
    port: u16,
    state: Arc<Mutex<ServerState>>,
    task: JoinHandle<()>,
}

impl FakeFtpServer {
    pub async fn start(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut initial = ServerState::default();
        for name in &behavior.existing {
            initial.files.insert(name.clone(), Vec::new());
        }
        let state = Arc::new(Mutex::new(initial));
        let behavior = Arc::new(behavior);

        let shared = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, state, behavior).await;
                });
            }
        });

        Self { port, state, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every command line received, across sessions, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(name).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().files.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn bind_passive(behavior: &ServerBehavior) -> io::Result<(u16, Option<TcpListener>)> {
    let socket = TcpSocket::new_v4()?;
    if behavior.stall_data {
        socket.set_recv_buffer_size(4096)?;
    }
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    socket.bind(addr)?;
    let listener = socket.listen(4)?;
    let port = listener.local_addr()?.port();
    if behavior.refuse_data {
        return Ok((port, None));
    }
    Ok((port, Some(listener)))
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    behavior: Arc<ServerBehavior>,
) -> io::Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    if behavior.multiline_greeting {
        wr.write_all(b"220-Welcome to the test server\r\n220-Uploads only\r\n220 Ready\r\n")
            .await?;
    } else {
        wr.write_all(b"220 Test FTP ready\r\n").await?;
    }

    let mut passive: Option<TcpListener> = None;
    let mut rename_from: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        state.lock().unwrap().commands.push(line.clone());
        let size = state.lock().unwrap().files.get(&arg).map(Vec::len);

        let reply: String = match verb.as_str() {
            "USER" if behavior.user_logs_in => "230 Logged in".into(),
            "USER" => "331 Password required".into(),
            "PASS" if behavior.reject_login => "530 Login incorrect".into(),
            "PASS" => "230 Logged in".into(),
            "TYPE" => "200 Type set to I".into(),
            "CWD" if behavior.reject_cwd => "550 No such directory".into(),
            "CWD" => "250 Directory changed".into(),
            "SIZE" if behavior.disable_size || behavior.disable_size_mlst => {
                "502 Command not implemented".into()
            }
            "SIZE" => match size {
                Some(len) => format!("213 {len}"),
                None => "550 No such file".into(),
            },
            "MLST" if behavior.disable_size_mlst => "502 Command not implemented".into(),
            "MLST" => match size {
                Some(len) => format!("250-Listing {arg}\r\n Type=file;Size={len}; {arg}\r\n250 End"),
                None => "550 No such file".into(),
            },
            "EPSV" if behavior.disable_epsv => "500 EPSV not understood".into(),
            "EPSV" => {
                let (port, listener) = bind_passive(&behavior)?;
                passive = listener;
                format!("229 Entering Extended Passive Mode (|||{port}|)")
            }
            "PASV" => {
                let (port, listener) = bind_passive(&behavior)?;
                passive = listener;
                // Deliberately unroutable host; clients must use the control host.
                format!("227 Entering Passive Mode (10,0,0,99,{},{})", port >> 8, port & 0xff)
            }
            "NLST" => match passive.take() {
                Some(listener) => {
                    wr.write_all(b"150 Here comes the listing\r\n").await?;
                    if let Ok(Ok((mut data, _))) = timeout(ACCEPT_TIMEOUT, listener.accept()).await {
                        let names: Vec<String> = state.lock().unwrap().files.keys().cloned().collect();
                        for name in names {
                            data.write_all(format!("{name}\r\n").as_bytes()).await?;
                        }
                        let _ = data.shutdown().await;
                    }
                    "226 Transfer complete".into()
                }
                None => "425 Use EPSV or PASV first".into(),
            },
            "STOR" => {
                let hang_up = behavior.hangup_on_first_store && {
                    let mut st = state.lock().unwrap();
                    let first = !st.hung_up;
                    st.hung_up = true;
                    first
                };
                if hang_up {
                    return Ok(());
                }
                let Some(listener) = passive.take() else {
                    wr.write_all(b"425 Can't open data connection\r\n").await?;
                    continue;
                };
                wr.write_all(b"150 Ok to send data\r\n").await?;
                let Ok(Ok((mut data, _))) = timeout(ACCEPT_TIMEOUT, listener.accept()).await else {
                    wr.write_all(b"425 Can't open data connection\r\n").await?;
                    continue;
                };
                if behavior.stall_data {
                    tokio::spawn(async move {
                        sleep(Duration::from_secs(30)).await;
                        drop(data);
                    });
                    continue;
                }
                let mut body = Vec::new();
                data.read_to_end(&mut body).await?;
                let failed = {
                    let mut st = state.lock().unwrap();
                    if st.stores_failed < behavior.fail_first_stores {
                        st.stores_failed += 1;
                        true
                    } else {
                        st.files.insert(arg.clone(), body);
                        false
                    }
                };
                if failed {
                    "451 Local error in processing".into()
                } else {
                    "226 Transfer complete".into()
                }
            }
            "RNFR" if size.is_some() => {
                rename_from = Some(arg.clone());
                "350 Ready for RNTO".into()
            }
            "RNFR" => "550 No such file".into(),
            "RNTO" if behavior.reject_rename => "553 Rename refused".into(),
            "RNTO" => match rename_from.take() {
                Some(from) => {
                    let mut st = state.lock().unwrap();
                    if let Some(body) = st.files.remove(&from) {
                        st.files.insert(arg.clone(), body);
                    }
                    "250 Rename successful".into()
                }
                None => "503 RNFR first".into(),
            },
            "ABOR" => "226 ABOR command successful".into(),
            "QUIT" => {
                wr.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            _ => "502 Command not implemented".into(),
        };
        wr.write_all(format!("{reply}\r\n").as_bytes()).await?;
    }
    Ok(())
}
