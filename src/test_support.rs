//! In-memory RESP server used by unit tests.
//!
//! Speaks just enough of the protocol to exercise pipelines, pools and the
//! client: PING, ECHO, INCR, GET, SET, SELECT, AUTH, QUIT and SUBSCRIBE.

use crate::buffer::BufferPools;
use crate::config::Endpoint;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::Pipeline;
use crate::pool::{ConnectionFactory, PoolKey};
use crate::protocol::{Reply, ReplyDecoder};
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Default)]
pub(crate) struct MockState {
    pub connections: AtomicUsize,
    pub quits: AtomicUsize,
    pub byte_by_byte: AtomicBool,
    password: Mutex<Option<String>>,
    store: Mutex<HashMap<String, i64>>,
    log: Mutex<Vec<Vec<String>>>,
}

/// Cheap handle; clones share state.
#[derive(Clone, Default)]
pub(crate) struct MockServer {
    pub state: Arc<MockState>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires AUTH with this password before other commands.
    pub fn with_password(self, password: &str) -> Self {
        *self.state.password.lock().unwrap() = Some(password.to_string());
        self
    }

    /// Writes replies one byte per write.
    pub fn byte_by_byte(self) -> Self {
        self.state.byte_by_byte.store(true, Ordering::SeqCst);
        self
    }

    /// Every command received so far, as strings.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn quits(&self) -> usize {
        self.state.quits.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Serves one connection on a background task.
    pub fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(serve_connection(stream, Arc::clone(&self.state)));
    }

    /// A connected pipeline over an in-memory duplex stream.
    pub fn pipeline(&self, pools: BufferPools) -> Pipeline {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.serve(server);
        Pipeline::from_stream(Endpoint::new("127.0.0.1", 6379), client, pools)
    }

    /// Accepts TCP connections on an ephemeral local port.
    pub async fn listen(&self) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::from(listener.local_addr().unwrap());
        let server = self.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                server.serve(socket);
            }
        });
        endpoint
    }
}

/// Decodes every complete command buffered so far.
fn drain_commands(decoder: &mut ReplyDecoder, buf: &mut BytesMut) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    loop {
        let (consumed, value) = match decoder.decode(&buf[..]) {
            Ok(result) => result,
            Err(_) => return commands,
        };
        let _ = buf.split_to(consumed);
        match value {
            Some(Reply::MultiBulk(Some(items))) => commands.push(
                items
                    .iter()
                    .map(|i| String::from_utf8_lossy(i.as_bytes().unwrap_or_default()).into_owned())
                    .collect(),
            ),
            Some(_) => continue,
            None => return commands,
        }
    }
}

async fn serve_connection<S>(mut stream: S, state: Arc<MockState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = ReplyDecoder::new();
    let mut pending = BytesMut::new();
    let mut chunk = [0u8; 4096];
    let mut authenticated = state.password.lock().unwrap().is_none();

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&chunk[..n]);

        let mut out = Vec::new();
        let mut quit = false;
        for args in drain_commands(&mut decoder, &mut pending) {
            state.log.lock().unwrap().push(args.clone());
            let verb = args[0].to_ascii_uppercase();
            if !authenticated && verb != "AUTH" && verb != "QUIT" {
                Reply::error("NOAUTH Authentication required.").serialize_into(&mut out);
                continue;
            }

            let reply = match verb.as_str() {
                "PING" => Reply::status("PONG"),
                "ECHO" => Reply::bulk(args[1].clone()),
                "SELECT" => Reply::ok(),
                "AUTH" => {
                    let expected = state.password.lock().unwrap().clone();
                    if expected.as_deref() == args.last().map(|s| s.as_str()) {
                        authenticated = true;
                        Reply::ok()
                    } else {
                        Reply::error("WRONGPASS invalid username-password pair")
                    }
                }
                "INCR" => {
                    let mut store = state.store.lock().unwrap();
                    let value = store.entry(args[1].clone()).or_insert(0);
                    *value += 1;
                    Reply::Integer(*value)
                }
                "GET" => match state.store.lock().unwrap().get(&args[1]) {
                    Some(v) => Reply::bulk(v.to_string()),
                    None => Reply::nil(),
                },
                "SET" => match args[2].parse() {
                    Ok(v) => {
                        state.store.lock().unwrap().insert(args[1].clone(), v);
                        Reply::ok()
                    }
                    Err(_) => Reply::error("ERR value is not an integer"),
                },
                "SUBSCRIBE" => {
                    for (i, channel) in args[1..].iter().enumerate() {
                        Reply::multi(vec![
                            Reply::bulk("subscribe"),
                            Reply::bulk(channel.clone()),
                            Reply::Integer(i as i64 + 1),
                        ])
                        .serialize_into(&mut out);
                    }
                    Reply::multi(vec![
                        Reply::bulk("message"),
                        Reply::bulk(args[1].clone()),
                        Reply::bulk("welcome"),
                    ])
                }
                "QUIT" => {
                    state.quits.fetch_add(1, Ordering::SeqCst);
                    quit = true;
                    Reply::ok()
                }
                _ => Reply::error("ERR unknown command"),
            };
            reply.serialize_into(&mut out);
            if quit {
                break;
            }
        }

        let written = if state.byte_by_byte.load(Ordering::SeqCst) {
            write_bytewise(&mut stream, &out).await
        } else {
            stream.write_all(&out).await
        };
        if written.is_err() || quit {
            return;
        }
    }
}

async fn write_bytewise<S: AsyncWrite + Unpin>(stream: &mut S, out: &[u8]) -> io::Result<()> {
    for byte in out {
        stream.write_all(std::slice::from_ref(byte)).await?;
    }
    Ok(())
}

/// Pool factory handing out duplex pipelines to a [`MockServer`].
#[derive(Clone)]
pub(crate) struct MockFactory {
    pub server: MockServer,
    pub pools: BufferPools,
    pub fail: Arc<AtomicBool>,
}

impl MockFactory {
    pub fn new(server: MockServer) -> Self {
        Self {
            server,
            pools: BufferPools::default(),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ConnectionFactory for MockFactory {
    fn create(&self, _key: &PoolKey) -> impl Future<Output = ClientResult<Pipeline>> + Send {
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(ClientError::Transport(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            )))
        } else {
            Ok(self.server.pipeline(self.pools.clone()))
        };
        std::future::ready(result)
    }
}
