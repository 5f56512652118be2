use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use line_broadcast::{
    Server, ServerConfig, ServerError, ShutdownReport, registry::ClientRegistry, shutdown::Phase,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout},
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const NOTICE: &str = "Server> The server got shut down. Disconnected.\n";

struct RunningServer {
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<ShutdownReport>,
}

impl RunningServer {
    async fn start(config: ServerConfig) -> Result<Self> {
        let server = Server::bind(config.with_listen("127.0.0.1:0")).await?;
        let addr = server.local_addr();
        let registry = server.registry();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async move {
            let _ = stopped.await;
        }));

        Ok(Self {
            addr,
            registry,
            stop,
            task,
        })
    }

    async fn connect(&self) -> Result<TcpStream> {
        Ok(TcpStream::connect(self.addr).await?)
    }

    async fn wait_for_clients(&self, expected: usize) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READ_TIMEOUT;
        while self.registry.len().await != expected {
            if tokio::time::Instant::now() > deadline {
                bail!(
                    "expected {expected} clients, registry holds {}",
                    self.registry.len().await
                );
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn shutdown(self) -> Result<ShutdownReport> {
        let _ = self.stop.send(());
        Ok(timeout(READ_TIMEOUT, self.task).await??)
    }
}

fn name_of(stream: &TcpStream) -> Result<String> {
    Ok(stream.local_addr()?.to_string())
}

async fn expect_text(stream: &mut TcpStream, expected: &str) -> Result<()> {
    let mut buf = vec![0u8; expected.len()];
    timeout(READ_TIMEOUT, stream.read_exact(&mut buf)).await??;
    assert_eq!(String::from_utf8_lossy(&buf), expected);
    Ok(())
}

async fn expect_eof(stream: &mut TcpStream) -> Result<()> {
    let mut rest = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut rest)).await??;
    assert!(rest.is_empty(), "unexpected trailing bytes: {rest:?}");
    Ok(())
}

#[tokio::test]
async fn chat_round_trip_and_shutdown_notice() -> Result<()> {
    let server = RunningServer::start(ServerConfig::default()).await?;

    let mut c1 = server.connect().await?;
    server.wait_for_clients(1).await?;
    let c1_name = name_of(&c1)?;

    c1.write_all(b"hello\n").await?;
    expect_text(&mut c1, &format!("{c1_name}> hello\n")).await?;

    let mut c2 = server.connect().await?;
    server.wait_for_clients(2).await?;
    let c2_name = name_of(&c2)?;

    c2.write_all(b"hi\n").await?;
    let expected = format!("{c2_name}> hi\n");
    expect_text(&mut c1, &expected).await?;
    expect_text(&mut c2, &expected).await?;

    let addr = server.addr;
    let report = server.shutdown().await?;
    assert!(report.is_clean(), "failures: {:?}", report.failures);
    assert_eq!(report.notified, 2);
    assert_eq!(report.dispatched, 2);

    for stream in [&mut c1, &mut c2] {
        expect_text(stream, NOTICE).await?;
        expect_eof(stream).await?;
    }

    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn empty_line_is_broadcast_as_empty_payload() -> Result<()> {
    let server = RunningServer::start(ServerConfig::default()).await?;
    let mut client = server.connect().await?;
    server.wait_for_clients(1).await?;

    let name = name_of(&client)?;

    client.write_all(b"\n").await?;
    expect_text(&mut client, &format!("{name}> \n")).await?;

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn registry_follows_connects_and_disconnects() -> Result<()> {
    let server = RunningServer::start(ServerConfig::default()).await?;

    let mut connects = Vec::new();
    for _ in 0..20 {
        let addr = server.addr;
        connects.push(tokio::spawn(async move { TcpStream::connect(addr).await }));
    }
    let mut clients = Vec::new();
    for connect in connects {
        clients.push(connect.await??);
    }
    server.wait_for_clients(20).await?;

    let leaving: Vec<_> = clients.drain(..10).collect();
    drop(leaving);
    server.wait_for_clients(10).await?;

    let report = server.shutdown().await?;
    assert_eq!(report.notified, 10);
    Ok(())
}

#[tokio::test]
async fn departed_client_is_not_written_to() -> Result<()> {
    let server = RunningServer::start(ServerConfig {
        echo_to_sender: false,
        ..ServerConfig::default()
    })
    .await?;

    let mut stays = server.connect().await?;
    let leaves = server.connect().await?;
    server.wait_for_clients(2).await?;
    let leaves_name = name_of(&leaves)?;

    drop(leaves);
    server.wait_for_clients(1).await?;

    let mut speaker = server.connect().await?;
    server.wait_for_clients(2).await?;
    speaker.write_all(b"anyone there?\n").await?;
    expect_text(
        &mut stays,
        &format!("{}> anyone there?\n", name_of(&speaker)?),
    )
    .await?;

    let report = server.shutdown().await?;
    assert!(
        report.failures.iter().all(|f| *f.name != *leaves_name),
        "departed client was written to: {:?}",
        report.failures
    );
    assert_eq!(report.notified, 2);
    Ok(())
}

#[tokio::test]
async fn shutdown_phase_is_observable() -> Result<()> {
    let server = Server::bind(ServerConfig::default().with_listen("127.0.0.1:0")).await?;
    let mut phases = server.phases();
    assert_eq!(*phases.borrow(), Phase::Running);

    let report = server.run_until(async {}).await;
    assert!(report.is_clean());
    assert_eq!(report.notified, 0);

    phases.changed().await?;
    assert_eq!(*phases.borrow(), Phase::Stopped);
    Ok(())
}

#[tokio::test]
async fn bind_failure_is_fatal() -> Result<()> {
    let first = Server::bind(ServerConfig::default().with_listen("127.0.0.1:0")).await?;
    let taken = first.local_addr().to_string();

    match Server::bind(ServerConfig::default().with_listen(taken.clone())).await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, taken),
        Err(other) => bail!("unexpected error: {other}"),
        Ok(_) => bail!("second bind on {taken} should fail"),
    }
    Ok(())
}
