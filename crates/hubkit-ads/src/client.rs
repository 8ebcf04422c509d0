//! ADS connection abstraction and the AMS/TCP client

use crate::ams::{
    self, ADS_TCP_PORT, ADSIGRP_SYM_HNDBYNAME, ADSIGRP_SYM_RELEASEHND, ADSIGRP_SYM_UPLOAD,
    ADSIGRP_SYM_UPLOADINFO2, ADSIGRP_SYM_VALBYHND, AMS_TCP_HEADER_LEN, AdsSymbol, AmsAddr,
    AmsCommand, AmsNetId, AmsPacket, RawNotification, SYM_UPLOAD_INFO_LEN,
};
use crate::codec;
use crate::types::{AdsState, AdsType, AdsValue};
use async_trait::async_trait;
use hubkit_core::{Error, Result};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// AMS port we claim as the source of our requests
pub const SOURCE_PORT: u16 = 32905;

/// Capacity of the notification broadcast channel
const NOTIFICATION_CAPACITY: usize = 256;

/// Operations the hub needs from a PLC connection
///
/// Implemented by [`AmsTcpClient`]; tests substitute an in-memory PLC.
#[async_trait]
pub trait AdsConnection: Send + Sync {
    /// Read the ADS and device state
    async fn read_state(&self) -> Result<(AdsState, u16)>;

    /// Read a variable by symbol name
    async fn read_by_name(&self, name: &str, ty: AdsType) -> Result<AdsValue>;

    /// Write a variable by symbol name
    async fn write_by_name(&self, name: &str, ty: AdsType, value: &AdsValue) -> Result<()>;

    /// Subscribe to on-change notifications of a variable; returns the handle
    async fn add_notification(&self, name: &str, ty: AdsType) -> Result<u32>;

    /// Remove a notification
    async fn delete_notification(&self, handle: u32) -> Result<()>;

    /// Upload the PLC's symbol table
    async fn read_symbols(&self) -> Result<Vec<AdsSymbol>>;

    /// Receiver for incoming notification samples
    fn notifications(&self) -> broadcast::Receiver<RawNotification>;

    /// Drop the current connection and open a new one
    ///
    /// Notification handles do not survive a reconnect.
    async fn reconnect(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self);
}

/// Connection parameters of one PLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsParams {
    /// AMS net id of the PLC
    pub net_id: AmsNetId,
    /// Host of the PLC's ADS router
    pub host: String,
    /// AMS port of the PLC runtime
    pub port: u16,
    /// Per-request timeout
    pub timeout: Duration,
    /// TCP port of the ADS router
    pub router_port: u16,
}

impl AdsParams {
    /// Parameters with the default router port and a 5 second timeout
    pub fn new(net_id: AmsNetId, host: impl Into<String>, port: u16) -> Self {
        Self {
            net_id,
            host: host.into(),
            port,
            timeout: Duration::from_secs(5),
            router_port: ADS_TCP_PORT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_router_port(mut self, router_port: u16) -> Self {
        self.router_port = router_port;
        self
    }
}

/// Opens connections to PLCs
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to the PLC described by `params`
    ///
    /// # Errors
    ///
    /// `Error::CannotConnect` if the router is unreachable.
    async fn connect(&self, params: &AdsParams) -> Result<Arc<dyn AdsConnection>>;
}

/// Connector producing [`AmsTcpClient`]s
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, params: &AdsParams) -> Result<Arc<dyn AdsConnection>> {
        let client = AmsTcpClient::new(params.clone());
        client.connect().await?;
        Ok(Arc::new(client))
    }
}

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<AmsPacket>>>>;

struct Link {
    writer: OwnedWriteHalf,
    source: AmsAddr,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl Link {
    fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// ADS client speaking AMS over TCP
///
/// The connection is opened lazily and re-opened on the next request after
/// the socket dropped. Responses are matched to requests by invoke id;
/// device notifications are forwarded to [`AdsConnection::notifications`].
pub struct AmsTcpClient {
    params: AdsParams,
    invoke_id: AtomicU32,
    link: tokio::sync::Mutex<Option<Link>>,
    notify_tx: broadcast::Sender<RawNotification>,
    // notification handle -> symbol handle
    symbols: Mutex<HashMap<u32, u32>>,
}

impl AmsTcpClient {
    /// Create a client; no connection is made yet
    pub fn new(params: AdsParams) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            params,
            invoke_id: AtomicU32::new(1),
            link: tokio::sync::Mutex::new(None),
            notify_tx,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    /// Connection parameters
    pub fn params(&self) -> &AdsParams {
        &self.params
    }

    /// Open the connection now instead of on the first request
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        if guard.as_ref().is_some_and(Link::is_alive) {
            return Ok(());
        }
        *guard = Some(self.open().await?);
        Ok(())
    }

    async fn open(&self) -> Result<Link> {
        let target = (self.params.host.as_str(), self.params.router_port);
        let stream = tokio::time::timeout(self.params.timeout, TcpStream::connect(target))
            .await
            .map_err(|_| {
                Error::cannot_connect(format!(
                    "Timed out connecting to {}:{}",
                    self.params.host, self.params.router_port
                ))
            })?
            .map_err(|e| {
                Error::cannot_connect(format!(
                    "Failed to connect to {}:{}: {}",
                    self.params.host, self.params.router_port, e
                ))
            })?;
        stream.set_nodelay(true)?;

        let source_id = match stream.local_addr()?.ip() {
            IpAddr::V4(ip) => AmsNetId::from_ip(ip),
            IpAddr::V6(_) => AmsNetId([127, 0, 0, 1, 1, 1]),
        };
        let source = AmsAddr {
            net_id: source_id,
            port: SOURCE_PORT,
        };

        let (read_half, writer) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            self.notify_tx.clone(),
            self.params.net_id,
        ));

        debug!(
            "[{}] Connected to ADS router {}:{} as {}",
            self.params.net_id, self.params.host, self.params.router_port, source_id
        );
        Ok(Link {
            writer,
            source,
            pending,
            reader,
        })
    }

    async fn request(&self, command: AmsCommand, payload: &[u8]) -> Result<Vec<u8>> {
        let invoke_id = self.invoke_id.fetch_add(1, Ordering::Relaxed);
        let target = AmsAddr {
            net_id: self.params.net_id,
            port: self.params.port,
        };

        let (rx, pending) = {
            let mut guard = self.link.lock().await;
            if !guard.as_ref().is_some_and(Link::is_alive) {
                *guard = Some(self.open().await?);
            }
            let Some(link) = guard.as_mut() else {
                return Err(Error::cannot_connect("ADS connection unavailable"));
            };

            let frame = ams::encode_request(target, link.source, command, invoke_id, payload);
            let (tx, rx) = oneshot::channel();
            lock(&link.pending).insert(invoke_id, tx);

            if let Err(e) = link.writer.write_all(&frame).await {
                lock(&link.pending).remove(&invoke_id);
                *guard = None;
                return Err(Error::cannot_connect(format!("ADS write failed: {}", e)));
            }
            (rx, Arc::clone(&link.pending))
        };

        trace!("[{}] Sent {:?} (invoke {})", self.params.net_id, command, invoke_id);
        let packet = match tokio::time::timeout(self.params.timeout, rx).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(_)) => return Err(Error::cannot_connect("ADS connection closed")),
            Err(_) => {
                lock(&pending).remove(&invoke_id);
                return Err(Error::transient(format!(
                    "ADS {:?} request timed out after {:?}",
                    command, self.params.timeout
                )));
            }
        };

        if packet.header.error_code != 0 {
            return Err(ams::ads_error(packet.header.error_code));
        }
        Ok(packet.payload)
    }

    async fn read(&self, index_group: u32, index_offset: u32, length: u32) -> Result<Vec<u8>> {
        let payload = ams::read_request(index_group, index_offset, length);
        let response = self.request(AmsCommand::Read, &payload).await?;
        ams::parse_read_response(&response)
    }

    async fn symbol_handle(&self, name: &str) -> Result<u32> {
        let mut symbol = name.as_bytes().to_vec();
        symbol.push(0);
        let payload = ams::read_write_request(ADSIGRP_SYM_HNDBYNAME, 0, 4, &symbol);
        let response = self.request(AmsCommand::ReadWrite, &payload).await?;
        let data = ams::parse_read_response(&response).map_err(|e| match e {
            Error::NotFound(_) => Error::not_found(format!("ADS symbol {}", name)),
            other => other,
        })?;
        let bytes: [u8; 4] = data
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::decode("Symbol handle response too short"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    async fn release_handle(&self, handle: u32) {
        let payload = ams::write_request(ADSIGRP_SYM_RELEASEHND, 0, &handle.to_le_bytes());
        let result = match self.request(AmsCommand::Write, &payload).await {
            Ok(response) => ams::parse_status_response(&response),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!("[{}] Failed to release handle {}: {}", self.params.net_id, handle, e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: Pending,
    notify_tx: broadcast::Sender<RawNotification>,
    net_id: AmsNetId,
) {
    let result: Result<()> = async {
        loop {
            let mut prefix = [0u8; AMS_TCP_HEADER_LEN];
            reader.read_exact(&mut prefix).await?;
            let mut body = vec![0u8; ams::packet_length(&prefix)?];
            reader.read_exact(&mut body).await?;

            let packet = ams::parse_packet(&body)?;
            if packet.header.command == AmsCommand::DeviceNotification as u16 {
                match ams::parse_notification_stream(&packet.payload) {
                    Ok(samples) => {
                        for sample in samples {
                            // No receivers is fine
                            let _ = notify_tx.send(sample);
                        }
                    }
                    Err(e) => warn!("[{}] Dropping malformed notification: {}", net_id, e),
                }
                continue;
            }

            if !packet.header.is_response() {
                trace!("[{}] Ignoring request {} from PLC", net_id, packet.header.command);
                continue;
            }
            let waiter = lock(&pending).remove(&packet.header.invoke_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(packet);
                }
                None => trace!(
                    "[{}] Response for unknown invoke id {}",
                    net_id, packet.header.invoke_id
                ),
            }
        }
    }
    .await;

    if let Err(e) = result {
        debug!("[{}] ADS connection closed: {}", net_id, e);
    }
    // Wake all waiters with a closed channel
    lock(&pending).clear();
}

#[async_trait]
impl AdsConnection for AmsTcpClient {
    async fn read_state(&self) -> Result<(AdsState, u16)> {
        let response = self.request(AmsCommand::ReadState, &[]).await?;
        ams::parse_read_state_response(&response)
    }

    async fn read_by_name(&self, name: &str, ty: AdsType) -> Result<AdsValue> {
        let handle = self.symbol_handle(name).await?;
        let payload = ams::read_request(ADSIGRP_SYM_VALBYHND, handle, ty.size() as u32);
        let result = match self.request(AmsCommand::Read, &payload).await {
            Ok(response) => ams::parse_read_response(&response),
            Err(e) => Err(e),
        };
        self.release_handle(handle).await;
        codec::decode(ty, &result?)
    }

    async fn write_by_name(&self, name: &str, ty: AdsType, value: &AdsValue) -> Result<()> {
        let data = codec::encode(ty, value)?;
        let handle = self.symbol_handle(name).await?;
        let payload = ams::write_request(ADSIGRP_SYM_VALBYHND, handle, &data);
        let result = match self.request(AmsCommand::Write, &payload).await {
            Ok(response) => ams::parse_status_response(&response),
            Err(e) => Err(e),
        };
        self.release_handle(handle).await;
        result
    }

    async fn add_notification(&self, name: &str, ty: AdsType) -> Result<u32> {
        let symbol = self.symbol_handle(name).await?;
        let payload =
            ams::add_notification_request(ADSIGRP_SYM_VALBYHND, symbol, ty.size() as u32, 0, 0);
        let result = match self.request(AmsCommand::AddNotification, &payload).await {
            Ok(response) => ams::parse_add_notification_response(&response),
            Err(e) => Err(e),
        };
        match result {
            Ok(handle) => {
                lock(&self.symbols).insert(handle, symbol);
                Ok(handle)
            }
            Err(e) => {
                self.release_handle(symbol).await;
                Err(e)
            }
        }
    }

    async fn delete_notification(&self, handle: u32) -> Result<()> {
        let payload = ams::delete_notification_request(handle);
        let response = self.request(AmsCommand::DeleteNotification, &payload).await?;
        let symbol = lock(&self.symbols).remove(&handle);
        if let Some(symbol) = symbol {
            self.release_handle(symbol).await;
        }
        ams::parse_status_response(&response)
    }

    async fn read_symbols(&self) -> Result<Vec<AdsSymbol>> {
        let info = self
            .read(ADSIGRP_SYM_UPLOADINFO2, 0, SYM_UPLOAD_INFO_LEN)
            .await?;
        let (count, table_len) = ams::parse_upload_info(&info)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let table = self.read(ADSIGRP_SYM_UPLOAD, 0, table_len).await?;
        let symbols = ams::parse_symbol_table(&table)?;
        debug!(
            "[{}] Uploaded {} of {} symbol(s)",
            self.params.net_id,
            symbols.len(),
            count
        );
        Ok(symbols)
    }

    fn notifications(&self) -> broadcast::Receiver<RawNotification> {
        self.notify_tx.subscribe()
    }

    async fn reconnect(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        if let Some(mut old) = guard.take() {
            let _ = old.writer.shutdown().await;
        }
        lock(&self.symbols).clear();
        *guard = Some(self.open().await?);
        Ok(())
    }

    async fn close(&self) {
        let mut guard = self.link.lock().await;
        if let Some(mut link) = guard.take() {
            let _ = link.writer.shutdown().await;
            debug!("[{}] ADS connection closed", self.params.net_id);
        }
        lock(&self.symbols).clear();
    }
}

impl std::fmt::Debug for AmsTcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmsTcpClient")
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ams::{AMS_HEADER_LEN, AmsHeader, STATE_FLAG_RESPONSE};
    use tokio::net::TcpListener;

    const PLC_NET_ID: AmsNetId = AmsNetId([10, 0, 0, 5, 1, 1]);

    /// Answer one request frame read from `stream`
    async fn answer(stream: &mut TcpStream, respond: impl Fn(&AmsPacket) -> Vec<u8>) -> AmsPacket {
        let mut prefix = [0u8; AMS_TCP_HEADER_LEN];
        stream.read_exact(&mut prefix).await.unwrap();
        let mut body = vec![0u8; ams::packet_length(&prefix).unwrap()];
        stream.read_exact(&mut body).await.unwrap();
        let request = ams::parse_packet(&body).unwrap();

        let payload = respond(&request);
        let header = AmsHeader {
            target: request.header.source,
            source: request.header.target,
            command: request.header.command,
            state_flags: request.header.state_flags | STATE_FLAG_RESPONSE,
            data_length: payload.len() as u32,
            error_code: 0,
            invoke_id: request.header.invoke_id,
        };
        stream
            .write_all(&ams::encode_packet(&header, &payload))
            .await
            .unwrap();
        request
    }

    async fn fake_plc() -> (TcpListener, AdsParams) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let params = AdsParams::new(PLC_NET_ID, "127.0.0.1", 851)
            .with_router_port(port)
            .with_timeout(Duration::from_secs(2));
        (listener, params)
    }

    #[tokio::test]
    async fn test_read_state_over_tcp() {
        let (listener, params) = fake_plc().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            answer(&mut stream, |_| {
                let mut p = 0u32.to_le_bytes().to_vec();
                p.extend_from_slice(&5u16.to_le_bytes());
                p.extend_from_slice(&0u16.to_le_bytes());
                p
            })
            .await
        });

        let client = AmsTcpClient::new(params);
        let (state, _) = client.read_state().await.unwrap();
        assert_eq!(state, AdsState::Run);

        let request = server.await.unwrap();
        assert_eq!(request.header.command, AmsCommand::ReadState as u16);
        assert_eq!(request.header.target.net_id, PLC_NET_ID);
        assert_eq!(request.header.target.port, 851);
        assert_eq!(request.header.data_length, 0);
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let (listener, params) = fake_plc().await;
        let client = AmsTcpClient::new(params);
        let mut rx = client.notifications();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let payload = ams::encode_notification_stream(0, &[(42, &[1])]);
            let header = AmsHeader {
                target: AmsAddr {
                    net_id: AmsNetId([127, 0, 0, 1, 1, 1]),
                    port: SOURCE_PORT,
                },
                source: AmsAddr {
                    net_id: PLC_NET_ID,
                    port: 851,
                },
                command: AmsCommand::DeviceNotification as u16,
                state_flags: 0x0004,
                data_length: payload.len() as u32,
                error_code: 0,
                invoke_id: 0,
            };
            let frame = ams::encode_packet(&header, &payload);
            assert_eq!(frame.len(), AMS_TCP_HEADER_LEN + AMS_HEADER_LEN + payload.len());
            stream.write_all(&frame).await.unwrap();
            stream
        });

        client.connect().await.unwrap();
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.handle, 42);
        assert_eq!(sample.data, vec![1]);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_symbol_upload_over_tcp() {
        let (listener, params) = fake_plc().await;
        let symbols = vec![
            AdsSymbol::new("GVL.Kitchen", "ST_Light"),
            AdsSymbol::new("GVL.Garden", "ST_Valve"),
        ];
        let table = ams::encode_symbol_table(&symbols);

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let respond = |request: &AmsPacket| {
                let group = u32::from_le_bytes(request.payload[..4].try_into().unwrap());
                let data = if group == ADSIGRP_SYM_UPLOADINFO2 {
                    let mut info = 2u32.to_le_bytes().to_vec();
                    info.extend_from_slice(&(table.len() as u32).to_le_bytes());
                    info.extend_from_slice(&[0u8; 16]);
                    info
                } else {
                    table.clone()
                };
                let mut p = 0u32.to_le_bytes().to_vec();
                p.extend_from_slice(&(data.len() as u32).to_le_bytes());
                p.extend_from_slice(&data);
                p
            };
            let info = answer(&mut stream, respond).await;
            let upload = answer(&mut stream, respond).await;
            (info, upload)
        });

        let client = AmsTcpClient::new(params);
        assert_eq!(client.read_symbols().await.unwrap(), symbols);

        let (info, upload) = server.await.unwrap();
        assert_eq!(info.header.command, AmsCommand::Read as u16);
        assert_eq!(&info.payload[..4], &ADSIGRP_SYM_UPLOADINFO2.to_le_bytes());
        assert_eq!(&upload.payload[..4], &ADSIGRP_SYM_UPLOAD.to_le_bytes());
    }

    #[tokio::test]
    async fn test_connect_refused_is_cannot_connect() {
        let (listener, params) = fake_plc().await;
        drop(listener);

        let client = AmsTcpClient::new(params);
        let err = client.read_state().await.unwrap_err();
        assert!(matches!(err, Error::CannotConnect(_)), "got {:?}", err);
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_request_timeout_is_transient() {
        let (listener, params) = fake_plc().await;
        let params = params.with_timeout(Duration::from_millis(200));
        let _server = tokio::spawn(async move {
            // Accept and never answer
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let client = AmsTcpClient::new(params);
        let err = client.read_state().await.unwrap_err();
        assert!(matches!(err, Error::Transient(_)), "got {:?}", err);
    }
}
