use std::time::Duration;

use async_trait::async_trait;
use rmodbus::{ErrorKind, ModbusProto, client::ModbusRequest, guess_response_frame_len};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use crate::{
    config::DriveConfig,
    hardware::{BusError, drive::DriveBus},
};

/// Modbus-TCP link to the fan drive.
///
/// A link that fails mid-transaction is dropped and transparently re-opened by
/// the next request, so a stale response can never be read as a fresh one.
pub struct ModbusDrive {
    host: String,
    port: u16,
    timeout: Duration,
    request: ModbusRequest,
    stream: Option<TcpStream>,
}

impl ModbusDrive {
    const HEADER_LEN: usize = 6;

    pub fn new(config: &DriveConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: Duration::from_millis(config.timeout_ms),
            request: ModbusRequest::new(config.device_id, ModbusProto::TcpUdp),
            stream: None,
        }
    }

    async fn open(&mut self) -> Result<&mut TcpStream, BusError> {
        if self.stream.is_none() {
            tracing::debug!("Connecting to drive at {}:{}", self.host, self.port);

            let connect = TcpStream::connect((self.host.as_str(), self.port));
            let stream = timeout(self.timeout, connect)
                .await
                .map_err(|_| self.timeout_error())??;

            stream.set_nodelay(true)?;
            self.stream = Some(stream);
        }

        self.stream.as_mut().ok_or(BusError::NotConnected)
    }

    async fn transact(&mut self, request: &[u8]) -> Result<Vec<u8>, BusError> {
        let limit = self.timeout;
        let stream = self.open().await?;

        let outcome = timeout(limit, Self::exchange(stream, request)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        };

        if result.is_err() {
            self.stream = None;
        }

        result
    }

    async fn exchange(stream: &mut TcpStream, request: &[u8]) -> Result<Vec<u8>, BusError> {
        stream.write_all(request).await?;

        let mut response = vec![0; Self::HEADER_LEN];
        stream.read_exact(&mut response).await?;

        let len = guess_response_frame_len(&response, ModbusProto::TcpUdp).map_err(modbus_error)?;
        let len = usize::from(len);

        if len > Self::HEADER_LEN {
            response.resize(len, 0);
            stream.read_exact(&mut response[Self::HEADER_LEN..]).await?;
        }

        Ok(response)
    }

    fn timeout_error(&self) -> BusError {
        BusError::Timeout(self.timeout.as_millis() as u64)
    }
}

#[async_trait]
impl DriveBus for ModbusDrive {
    async fn connect(&mut self) -> Result<(), BusError> {
        self.open().await.map(|_| ())
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }

        Ok(())
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, BusError> {
        tracing::trace!("Reading {count} register(s) at {address}");

        let mut request = Vec::new();
        self.request
            .generate_get_holdings(address, count, &mut request)
            .map_err(modbus_error)?;

        let response = self.transact(&request).await?;

        let mut values = Vec::with_capacity(usize::from(count));
        self.request
            .parse_u16(&response, &mut values)
            .map_err(modbus_error)?;

        Ok(values)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), BusError> {
        tracing::trace!("Writing {value} to register {address}");

        let mut request = Vec::new();
        self.request
            .generate_set_holding(address, value, &mut request)
            .map_err(modbus_error)?;

        let response = self.transact(&request).await?;

        self.request.parse_ok(&response).map_err(modbus_error)
    }
}

fn modbus_error(err: ErrorKind) -> BusError {
    BusError::Modbus(format!("{err:?}"))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::Ipv4Addr};

    use tokio::net::TcpListener;

    use super::*;

    /// Minimal Modbus-TCP responder supporting "read holding registers" and
    /// "write single register".
    async fn spawn_responder(mut registers: HashMap<u16, u16>) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut frame = [0u8; 12];

            while socket.read_exact(&mut frame).await.is_ok() {
                let function = frame[7];
                let address = u16::from_be_bytes([frame[8], frame[9]]);
                let operand = u16::from_be_bytes([frame[10], frame[11]]);

                let response = match function {
                    0x03 => {
                        let mut response = frame[..8].to_vec();
                        let byte_count = (operand * 2) as u8;
                        let len = 3 + u16::from(byte_count);

                        response[4..6].copy_from_slice(&len.to_be_bytes());
                        response.push(byte_count);

                        for offset in 0..operand {
                            let value = registers.get(&(address + offset)).copied().unwrap_or(0);
                            response.extend_from_slice(&value.to_be_bytes());
                        }

                        response
                    }

                    0x06 => {
                        registers.insert(address, operand);
                        frame.to_vec()
                    }

                    _ => unreachable!("unsupported function {function}"),
                };

                socket.write_all(&response).await.unwrap();
            }
        });

        port
    }

    fn config(port: u16) -> DriveConfig {
        DriveConfig {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_read_and_write_registers() {
        let registers = HashMap::from([(7201, 22), (7202, 9)]);
        let port = spawn_responder(registers).await;

        let mut drive = ModbusDrive::new(&config(port));
        drive.connect().await.unwrap();

        let values = drive.read_registers(7201, 2).await.unwrap();
        assert_eq!(values, vec![22, 9]);

        drive.write_register(8502, 250).await.unwrap();
        assert_eq!(drive.read_register(8502).await.unwrap(), 250);

        drive.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_drive_is_a_bus_error() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut drive = ModbusDrive::new(&config(port));
        assert!(drive.read_register(8501).await.is_err());
    }
}
