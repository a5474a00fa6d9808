//! Server
//!
//! Glues the pieces together on one thread:
//!
//! ```text
//!                    ┌──────────────────────────────────┐
//!   listener ──────> │ accept_handler                   │ ── register READABLE
//!                    └──────────────────────────────────┘
//!                    ┌──────────────────────────────────┐
//!   client readable  │ read_query_from_client           │
//!   ───────────────> │  decode -> Engine::execute       │ ── reply queue,
//!                    └──────────────────────────────────┘    pending_writes
//!                    ┌──────────────────────────────────┐
//!   before poll      │ before_sleep                     │
//!   ───────────────> │  flush AOF, then write replies   │ ── register WRITABLE
//!                    │  of pending_writes               │    if not drained
//!                    └──────────────────────────────────┘
//!                    ┌──────────────────────────────────┐
//!   client writable  │ send_reply_to_client             │ ── unregister WRITABLE
//!   ───────────────> │                                  │    when drained
//!                    └──────────────────────────────────┘
//!                    ┌──────────────────────────────────┐
//!   every 1000/hz ms │ server_cron                      │
//!   ───────────────> │  expiry, rehash, AOF rewrite     │
//!                    │  completion and trigger, flush   │
//!                    └──────────────────────────────────┘
//! ```

use crate::commands::CommandTable;
use crate::config::ServerConfig;
use crate::connection::{Client, ConnectionError, ConnectionStats};
use crate::persistence::{replay, AofError, AppendOnlyLog};
use crate::protocol::Reply;
use crate::reactor::{EventLoop, Mask, TimerId, TimerKind};
use crate::storage::{active_expire_cycle, Database, ExpiryConfig};
use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::Token;
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::{debug, error, info, warn};

/// Token of the listening socket.
const LISTENER: Token = Token(0);

/// Budget of incremental rehashing per cron tick.
const REHASH_BUDGET_MS: u64 = 1;

const MAX_CLIENTS_REPLY: &[u8] = b"-ERR max number of clients reached\r\n";

/// The keyspace, its command table and its log.
pub struct Engine {
    db: Database,
    aof: Option<AppendOnlyLog>,
    commands: CommandTable,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine without persistence.
    pub fn new() -> Self {
        Self {
            db: Database::new(),
            aof: None,
            commands: CommandTable::new(),
        }
    }

    /// Creates an engine for `config`, replaying the log first when
    /// append-only persistence is enabled.
    pub fn open(config: &ServerConfig) -> Result<Self, AofError> {
        let mut engine = Self::new();
        if config.appendonly {
            let aof_config = config.aof_config();
            replay(&aof_config.path, &mut engine.db, &engine.commands)?;
            engine.aof = Some(AppendOnlyLog::open(&aof_config)?);
        }
        Ok(engine)
    }

    /// Runs one command.
    pub fn execute(&mut self, args: &[Bytes]) -> Reply {
        self.commands.execute(&mut self.db, self.aof.as_mut(), args)
    }

    pub fn db(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn aof(&self) -> Option<&AppendOnlyLog> {
        self.aof.as_ref()
    }

    /// Periodic maintenance.
    pub fn cron(&mut self, expiry: &ExpiryConfig) {
        active_expire_cycle(&mut self.db, expiry);

        self.db.rehash_milliseconds(REHASH_BUDGET_MS);
        self.db.resize_if_needed();

        let Some(aof) = self.aof.as_mut() else {
            return;
        };
        if let Some(Err(e)) = aof.poll_rewrite() {
            warn!(error = %e, "Append only file rewrite discarded, the trigger will retry");
        }
        if aof.should_rewrite() {
            info!(
                size = aof.current_size(),
                base = aof.base_size(),
                "Starting automatic append only file rewrite"
            );
            if let Err(e) = aof.rewrite_in_background(&mut self.db) {
                warn!(error = %e, "Could not start append only file rewrite");
            }
        }
        self.flush_aof();
    }

    /// Writes buffered log records. Records that could not be written stay
    /// buffered for the next attempt.
    pub fn flush_aof(&mut self) {
        let Some(aof) = self.aof.as_mut() else {
            return;
        };
        if let Err(e) = aof.flush() {
            error!(
                error = %e,
                pending = aof.pending(),
                "Append only file flush failed, retrying before the next poll"
            );
        }
    }

    pub fn shutdown(&mut self) -> Result<(), AofError> {
        match self.aof.as_mut() {
            Some(aof) => aof.shutdown(),
            None => Ok(()),
        }
    }
}

pub struct Server {
    engine: Engine,
    listener: TcpListener,
    clients: HashMap<Token, Client>,
    /// Clients with replies waiting for the log flush in `before_sleep`
    pending_writes: Vec<Token>,
    next_token: usize,
    config: ServerConfig,
    expiry: ExpiryConfig,
    stats: ConnectionStats,
}

impl Server {
    /// Binds the listening socket.
    pub fn bind(config: ServerConfig, engine: Engine) -> io::Result<Self> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot resolve {}", config.bind_address()),
                )
            })?;
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "Listening");

        Ok(Self {
            engine,
            listener,
            clients: HashMap::new(),
            pending_writes: Vec::new(),
            next_token: LISTENER.0 + 1,
            config,
            expiry: ExpiryConfig::default(),
            stats: ConnectionStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Registers the listener, the cron timer and the before-sleep hook.
    pub fn install(&mut self, el: &mut EventLoop<Server>) -> io::Result<()> {
        el.register_io(&mut self.listener, LISTENER, Mask::READABLE, accept_handler)?;
        el.schedule_timer(TimerKind::Repeating, self.config.cron_interval(), server_cron);
        el.set_before_sleep(before_sleep);
        Ok(())
    }

    /// Disconnects every client and makes the log durable.
    pub fn shutdown(&mut self, el: &mut EventLoop<Server>) -> Result<(), AofError> {
        let tokens: Vec<Token> = self.clients.keys().copied().collect();
        for token in tokens {
            self.free_client(el, token);
        }
        let _ = el.unregister_io(&mut self.listener, LISTENER, Mask::READABLE);
        self.engine.shutdown()?;
        info!("Server shutdown complete");
        Ok(())
    }

    fn accept_client(&mut self, el: &mut EventLoop<Server>, mut stream: TcpStream, addr: SocketAddr) {
        if self.clients.len() >= self.config.max_clients {
            self.stats.connections_rejected += 1;
            warn!(client = %addr, "Max number of clients reached, rejecting");
            let _ = stream.write(MAX_CLIENTS_REPLY);
            return;
        }
        let _ = stream.set_nodelay(true);

        let token = Token(self.next_token);
        self.next_token += 1;
        let mut client = Client::new(stream, addr, token, self.config.limits);
        if let Err(e) = el.register_io(client.stream_mut(), token, Mask::READABLE, read_query_from_client) {
            warn!(client = %addr, error = %e, "Failed to register client");
            return;
        }
        self.clients.insert(token, client);
        self.stats.connection_opened();
        debug!(client = %addr, token = token.0, "Client connected");
    }

    /// Unregisters and drops a client, closing its socket.
    fn free_client(&mut self, el: &mut EventLoop<Server>, token: Token) {
        if let Some(mut client) = self.clients.remove(&token) {
            let _ = el.unregister_io(client.stream_mut(), token, Mask::READABLE | Mask::WRITABLE);
            self.stats.connection_closed();
            debug!(client = %client.addr(), "Client disconnected");
        }
    }

    /// Executes every complete command in the client's buffer.
    fn process_input(&mut self, token: Token) -> Result<(), ConnectionError> {
        let Some(client) = self.clients.get_mut(&token) else {
            return Ok(());
        };
        loop {
            match client.next_command() {
                Ok(Some(args)) => {
                    let reply = self.engine.execute(&args);
                    client.queue_reply(&reply);
                    self.stats.commands_processed += 1;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    client.queue_reply(&Reply::error(&e));
                    return Err(e.into());
                }
            }
        }
    }

    /// Writes what it can now; registers for writability if replies remain.
    fn flush_replies(&mut self, el: &mut EventLoop<Server>, token: Token) -> Result<(), ConnectionError> {
        let Some(client) = self.clients.get_mut(&token) else {
            return Ok(());
        };
        self.stats.bytes_written += client.write_pending()? as u64;
        if client.has_pending_replies() && !client.write_registered() {
            el.register_io(client.stream_mut(), token, Mask::WRITABLE, send_reply_to_client)?;
            client.set_write_registered(true);
        }
        Ok(())
    }
}

fn accept_handler(el: &mut EventLoop<Server>, server: &mut Server, _token: Token) {
    loop {
        match server.listener.accept() {
            Ok((stream, addr)) => server.accept_client(el, stream, addr),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                break;
            }
        }
    }
}

/// Reads and executes what the client sent.
///
/// Replies are not written here: the client is queued for `before_sleep`,
/// which flushes the log first, so a write is never acknowledged before it
/// reached the log file.
fn read_query_from_client(el: &mut EventLoop<Server>, server: &mut Server, token: Token) {
    let Some(addr) = server.clients.get(&token).map(|c| c.addr()) else {
        return;
    };
    loop {
        let Some(client) = server.clients.get_mut(&token) else {
            return;
        };
        match client.read_into_buffer() {
            Ok(n) => server.stats.bytes_read += n as u64,
            Err(e) => {
                warn!(client = %addr, error = %e, "Read error");
                server.free_client(el, token);
                return;
            }
        }
        let more = client.has_more_input();

        // Decoding between reads keeps the buffer down to one partial
        // command, which the decoder limits.
        if let Err(e) = server.process_input(token) {
            warn!(client = %addr, error = %e, "Protocol error, closing connection");
            server.engine.flush_aof();
            let _ = server.flush_replies(el, token);
            server.free_client(el, token);
            return;
        }
        if !more {
            break;
        }
    }

    let Some(client) = server.clients.get(&token) else {
        return;
    };
    if client.is_eof() {
        server.engine.flush_aof();
        if let Err(e) = server.flush_replies(el, token) {
            debug!(client = %addr, error = %e, "Write error");
        }
        server.free_client(el, token);
    } else if client.has_pending_replies() && !client.write_registered() {
        server.pending_writes.push(token);
    }
}

fn send_reply_to_client(el: &mut EventLoop<Server>, server: &mut Server, token: Token) {
    // Replies queued by a read earlier in this tick may acknowledge writes.
    server.engine.flush_aof();
    let Some(client) = server.clients.get_mut(&token) else {
        return;
    };
    match client.write_pending() {
        Ok(n) => server.stats.bytes_written += n as u64,
        Err(e) => {
            debug!(client = %client.addr(), error = %e, "Write error");
            server.free_client(el, token);
            return;
        }
    }
    if !client.has_pending_replies() {
        let _ = el.unregister_io(client.stream_mut(), token, Mask::WRITABLE);
        client.set_write_registered(false);
    }
}

fn server_cron(_el: &mut EventLoop<Server>, server: &mut Server, _id: TimerId) {
    server.engine.cron(&server.expiry);
}

fn before_sleep(el: &mut EventLoop<Server>, server: &mut Server) {
    server.engine.flush_aof();
    for token in std::mem::take(&mut server.pending_writes) {
        if let Err(e) = server.flush_replies(el, token) {
            debug!(token = token.0, error = %e, "Write error");
            server.free_client(el, token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FsyncPolicy;
    use crate::reactor::StopHandle;
    use std::fs;
    use std::io::Read;
    use std::net::TcpStream as StdStream;
    use std::sync::mpsc;
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Running {
        addr: SocketAddr,
        stop: StopHandle,
        thread: JoinHandle<()>,
    }

    impl Running {
        fn start(config: ServerConfig) -> Self {
            let (tx, rx) = mpsc::channel();
            let thread = std::thread::spawn(move || {
                let engine = Engine::open(&config).unwrap();
                let mut server = Server::bind(config, engine).unwrap();
                let mut el = EventLoop::new().unwrap();
                server.install(&mut el).unwrap();
                tx.send((server.local_addr().unwrap(), el.stop_handle())).unwrap();
                el.run(&mut server);
                server.shutdown(&mut el).unwrap();
            });
            let (addr, stop) = rx.recv().unwrap();
            Self { addr, stop, thread }
        }

        fn connect(&self) -> StdStream {
            let stream = StdStream::connect(self.addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            stream
        }

        fn stop(self) {
            self.stop.stop();
            self.thread.join().unwrap();
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig::builder().port(0).hz(100).build()
    }

    fn read_exact(stream: &mut StdStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    fn read_line(stream: &mut StdStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            if stream.read(&mut byte).unwrap() == 0 {
                break;
            }
            line.push(byte[0]);
        }
        String::from_utf8(line).unwrap()
    }

    fn assert_closed(stream: &mut StdStream) {
        let mut buf = [0u8; 16];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("unexpected {} bytes", n),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn test_set_then_get() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        conn.write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 5), b"+ok\r\n");
        conn.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 9), b"$3\r\nbar\r\n");
        server.stop();
    }

    #[test]
    fn test_get_missing_and_deleted() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        conn.write_all(b"GET nothing\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 6), b"+nil\r\n");

        conn.write_all(b"SET k v\r\nDEL k\r\nGET k\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 15), b"+ok\r\n:1\r\n+nil\r\n");
        server.stop();
    }

    #[test]
    fn test_fragmented_command() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        for piece in [&b"*1\r\n$4"[..], b"\r\nPI", b"NG\r", b"\n"] {
            conn.write_all(piece).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(read_exact(&mut conn, 7), b"+PONG\r\n");
        server.stop();
    }

    #[test]
    fn test_errors_keep_connection_open() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        conn.write_all(b"NOPE\r\n").unwrap();
        assert_eq!(read_line(&mut conn), "-ERR unknown command 'nope'\r\n");
        conn.write_all(b"GET\r\n").unwrap();
        assert_eq!(
            read_line(&mut conn),
            "-ERR wrong number of arguments for 'get' command\r\n"
        );
        conn.write_all(b"PING\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 7), b"+PONG\r\n");
        server.stop();
    }

    #[test]
    fn test_protocol_error_closes_connection() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        conn.write_all(b"*1\r\n#4\r\nPING\r\n").unwrap();
        assert!(read_line(&mut conn).starts_with("-ERR protocol error"));
        assert_closed(&mut conn);

        // Other clients are unaffected.
        let mut other = server.connect();
        other.write_all(b"PING\r\n").unwrap();
        assert_eq!(read_exact(&mut other, 7), b"+PONG\r\n");
        server.stop();
    }

    #[test]
    fn test_max_clients() {
        let server = Running::start(ServerConfig::builder().port(0).max_clients(1).build());
        let mut first = server.connect();
        first.write_all(b"PING\r\n").unwrap();
        assert_eq!(read_exact(&mut first, 7), b"+PONG\r\n");

        let mut second = server.connect();
        assert_eq!(read_line(&mut second), "-ERR max number of clients reached\r\n");
        assert_closed(&mut second);
        server.stop();
    }

    #[test]
    fn test_large_reply_is_fully_delivered() {
        let server = Running::start(test_config());
        let mut conn = server.connect();
        let value = "x".repeat(1024 * 1024);
        conn.write_all(format!("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n${}\r\n{}\r\n", value.len(), value).as_bytes())
            .unwrap();
        assert_eq!(read_exact(&mut conn, 5), b"+ok\r\n");

        conn.write_all(b"GET k\r\n").unwrap();
        let header = format!("${}\r\n", value.len());
        assert_eq!(read_exact(&mut conn, header.len()), header.as_bytes());
        let body = read_exact(&mut conn, value.len() + 2);
        assert!(body[..value.len()].iter().all(|&b| b == b'x'));
        server.stop();
    }

    #[test]
    fn test_acknowledged_write_is_in_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("appendonly.aof");
        let config = ServerConfig::builder()
            .port(0)
            .appendonly(true)
            .aof_path(&path)
            .fsync(FsyncPolicy::Always)
            .hz(1)
            .build();

        let server = Running::start(config);
        let mut conn = server.connect();
        conn.write_all(b"SET k v\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 5), b"+ok\r\n");
        assert_eq!(fs::read(&path).unwrap(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");

        conn.write_all(b"RPUSH l a\r\nDEL k\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 8), b":1\r\n:1\r\n");
        let text = String::from_utf8(fs::read(&path).unwrap()).unwrap();
        assert!(text.ends_with("*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n"), "log was {:?}", text);
        server.stop();
    }

    #[test]
    fn test_data_survives_restart() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::builder()
            .port(0)
            .appendonly(true)
            .aof_path(dir.path().join("appendonly.aof"))
            .build();

        let server = Running::start(config.clone());
        let mut conn = server.connect();
        conn.write_all(b"SET name ferro\r\nRPUSH l a b c\r\nZADD z 1 one\r\nEXPIRE name 100\r\n")
            .unwrap();
        assert_eq!(read_exact(&mut conn, 5 + 4 + 4 + 4), b"+ok\r\n:3\r\n:1\r\n:1\r\n");
        conn.write_all(b"BGREWRITEAOF\r\n").unwrap();
        assert!(read_line(&mut conn).starts_with("+Background append only file rewriting"));
        conn.write_all(b"SET after rewrite\r\n").unwrap();
        assert_eq!(read_exact(&mut conn, 5), b"+ok\r\n");
        drop(conn);
        server.stop();

        let server = Running::start(config);
        let mut conn = server.connect();
        conn.write_all(b"GET name\r\nLLEN l\r\nZSCORE z one\r\nGET after\r\n").unwrap();
        assert_eq!(
            read_exact(&mut conn, 11 + 4 + 7 + 13),
            b"$5\r\nferro\r\n:3\r\n$1\r\n1\r\n$7\r\nrewrite\r\n"
        );
        conn.write_all(b"TTL name\r\n").unwrap();
        let ttl = read_line(&mut conn);
        assert!(ttl == ":100\r\n" || ttl == ":99\r\n", "ttl was {}", ttl);
        server.stop();
    }
}
