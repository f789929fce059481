use avr_core::ReceiverError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub const TELNET_PORT: u16 = 23;

/// Receivers drop commands that arrive faster than this
const COMMAND_INTERVAL: Duration = Duration::from_millis(50);

/// Telnet session with a receiver.
///
/// Every CR terminated line sent by the receiver is handed to the line
/// callback from a background reader task.
pub struct TelnetConnection {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
    connected: Arc<AtomicBool>,
}

impl TelnetConnection {
    pub async fn connect<F>(host: &str, port: u16, timeout: Duration, on_line: F) -> Result<Self, ReceiverError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let addr = format!("{}:{}", host, port);
        debug!("Opening Telnet connection to {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ReceiverError::Timeout(format!("Telnet connection to {} timed out", addr)))?
            .map_err(|e| ReceiverError::Network(format!("Telnet connection to {} failed: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Cannot disable Nagle on {}: {}", addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_lines(
            addr.clone(),
            read_half,
            Arc::clone(&connected),
            on_line,
        ));

        info!("Telnet connection to {} established", addr);
        Ok(Self {
            addr,
            writer: Mutex::new(write_half),
            reader,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn send(&self, command: &str) -> Result<(), ReceiverError> {
        if !self.is_connected() {
            return Err(ReceiverError::Network(format!(
                "Telnet connection to {} is closed",
                self.addr
            )));
        }

        let mut writer = self.writer.lock().await;
        debug!("Telnet {} <- {}", self.addr, command);
        writer
            .write_all(format!("{}\r", command).as_bytes())
            .await
            .map_err(|e| ReceiverError::Network(format!("Telnet write to {} failed: {}", self.addr, e)))?;
        tokio::time::sleep(COMMAND_INTERVAL).await;
        Ok(())
    }

    pub async fn close(&self) {
        self.reader.abort();
        self.connected.store(false, Ordering::Release);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Telnet shutdown of {} failed: {}", self.addr, e);
        }
        info!("Telnet connection to {} closed", self.addr);
    }
}

impl Drop for TelnetConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_lines<F>(addr: String, read_half: OwnedReadHalf, connected: Arc<AtomicBool>, on_line: F)
where
    F: Fn(&str),
{
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf).await {
            Ok(0) => {
                warn!("Telnet connection to {} closed by receiver", addr);
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_matches(|c| c == '\r' || c == '\n');
                if !line.is_empty() {
                    trace!("Telnet {} -> {}", addr, line);
                    on_line(line);
                }
            }
            Err(e) => {
                warn!("Telnet read from {} failed: {}", addr, e);
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_lines_and_commands() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PWON\rMV50\r\nMUOFF\r").await.unwrap();

            let mut received = vec![0u8; 5];
            socket.read_exact(&mut received).await.unwrap();
            received
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = TelnetConnection::connect("127.0.0.1", port, Duration::from_secs(2), move |line| {
            let _ = tx.send(line.to_string());
        })
        .await
        .unwrap();

        for expected in ["PWON", "MV50", "MUOFF"] {
            assert_eq!(rx.recv().await.as_deref(), Some(expected));
        }

        connection.send("MVUP").await.unwrap();
        assert_eq!(server.await.unwrap(), b"MVUP\r");

        // Server side is gone now
        tokio::time::timeout(Duration::from_secs(2), async {
            while connection.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(connection.send("MVUP").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TelnetConnection::connect("127.0.0.1", port, Duration::from_secs(2), |_| {}).await;
        assert!(matches!(result, Err(ReceiverError::Network(_))));
    }
}
