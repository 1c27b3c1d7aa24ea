//! WinRT Transport
//!
//! [`Transport`] over the Windows Bluetooth LE GATT APIs.

use crate::domain::models::DeviceAddress;
use crate::infrastructure::bluetooth::transport::{
    DisconnectHandler, NotificationHandler, Transport,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

/// An open link and everything that must stay alive with it
struct Link {
    device: BluetoothLEDevice,
    /// Keeps Windows from dropping the connection between requests
    session: Option<GattSession>,
    service: GattDeviceService,
    status_token: i64,
    /// At most one registration per characteristic
    subscriptions: Vec<(Uuid, GattCharacteristic, i64)>,
}

pub struct WinRtTransport {
    service_uuid: GUID,
    link: Mutex<Option<Link>>,
    disconnect_handler: Arc<Mutex<Option<DisconnectHandler>>>,
}

impl WinRtTransport {
    pub fn new(service_uuid: Uuid) -> Self {
        Self {
            service_uuid: to_guid(service_uuid),
            link: Mutex::new(None),
            disconnect_handler: Arc::new(Mutex::new(None)),
        }
    }

    fn device(&self) -> Option<BluetoothLEDevice> {
        self.lock_link().as_ref().map(|link| link.device.clone())
    }

    fn service(&self) -> Result<GattDeviceService> {
        self.lock_link()
            .as_ref()
            .map(|link| link.service.clone())
            .context("not connected")
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self, address: u64) -> Result<Link> {
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device found: {:?}", device.Name()?);

        let session = match create_gatt_session(&device).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Failed to create GattSession, continuing anyway: {:#}", e);
                None
            }
        };

        let services_result = device
            .GetGattServicesForUuidAsync(self.service_uuid)?
            .await?;
        let status = services_result.Status()?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get GATT services: {:?}", status);
        }
        let services = services_result.Services()?;
        if services.Size()? == 0 {
            anyhow::bail!("Appliance service not found");
        }
        let service = services.GetAt(0)?;

        let access_status = service.RequestAccessAsync()?.await?;
        debug!("Service access status: {:?}", access_status);

        let handler = self.disconnect_handler.clone();
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let handler = handler
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        if let Some(handler) = handler {
                            handler();
                        }
                    }
                }
                Ok(())
            });
        let status_token = device.ConnectionStatusChanged(&status_handler)?;

        Ok(Link {
            device,
            session,
            service,
            status_token,
            subscriptions: Vec::new(),
        })
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<GattCharacteristic> {
        let service = self.service()?;
        let result = service
            .GetCharacteristicsForUuidAsync(to_guid(uuid))?
            .await?;
        let status = result.Status()?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get characteristic {}: {:?}", uuid, status);
        }
        let characteristics = result.Characteristics()?;
        if characteristics.Size()? == 0 {
            anyhow::bail!("Characteristic {} not found", uuid);
        }
        Ok(characteristics.GetAt(0)?)
    }

    fn close(link: Link) {
        for (_, characteristic, token) in link.subscriptions {
            let _ = characteristic.RemoveValueChanged(token);
        }
        let _ = link.device.RemoveConnectionStatusChanged(link.status_token);
        if let Some(session) = link.session {
            let _ = session.Close();
        }
        let _ = link.service.Close();
        let _ = link.device.Close();
    }
}

#[async_trait]
impl Transport for WinRtTransport {
    async fn connect(&self, address: &DeviceAddress) -> Result<()> {
        let raw = parse_address(address)?;
        info!("Connecting to Bluetooth device: {:#X}", raw);

        if let Some(stale) = self.lock_link().take() {
            Self::close(stale);
        }

        let link = self.open(raw).await?;
        *self.lock_link() = Some(link);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(link) = self.lock_link().take() {
            Self::close(link);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.device()
            .and_then(|d| d.ConnectionStatus().ok())
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic).await?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        let status = characteristic.WriteValueAsync(&buffer)?.await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write returned status {:?}", status);
        }
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid, handler: NotificationHandler) -> Result<()> {
        let characteristic = self.characteristic(uuid).await?;

        let value_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    let reader = DataReader::FromBuffer(&value)?;
                    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut bytes)?;
                    handler(&bytes);
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&value_handler)?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            let _ = characteristic.RemoveValueChanged(token);
            anyhow::bail!("Enabling notifications returned status {:?}", status);
        }

        match self.lock_link().as_mut() {
            Some(link) => {
                link.subscriptions.retain(|(existing, previous, previous_token)| {
                    if *existing != uuid {
                        return true;
                    }
                    debug!("Replacing notification handler on {}", uuid);
                    let _ = previous.RemoveValueChanged(*previous_token);
                    false
                });
                link.subscriptions.push((uuid, characteristic, token));
            }
            None => {
                let _ = characteristic.RemoveValueChanged(token);
                anyhow::bail!("Link closed while subscribing");
            }
        }
        Ok(())
    }

    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>) {
        *self
            .disconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }
}

async fn create_gatt_session(device: &BluetoothLEDevice) -> Result<GattSession> {
    let device_id = device.BluetoothDeviceId()?;
    let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
    session.SetMaintainConnection(true)?;
    Ok(session)
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

/// "AA:BB:CC:DD:EE:FF" (or bare hex) to the 48-bit integer WinRT expects.
pub fn parse_address(address: &DeviceAddress) -> Result<u64> {
    let hex: String = address
        .as_str()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if hex.len() != 12 {
        anyhow::bail!("Invalid Bluetooth address '{}'", address);
    }
    u64::from_str_radix(&hex, 16).with_context(|| format!("Invalid Bluetooth address '{}'", address))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        assert_eq!(parse_address(&address).unwrap(), 0xAABB_CCDD_EEFF);
        assert!(parse_address(&DeviceAddress::from("AA:BB")).is_err());
        assert!(parse_address(&DeviceAddress::from("ZZ:BB:CC:DD:EE:FF")).is_err());
    }

    #[test]
    fn test_guid_conversion() {
        let guid = to_guid(crate::infrastructure::bluetooth::protocol::SERVICE_UUID);
        assert_eq!(guid.data1, 0x0000_1000);
        assert_eq!(guid.data2, 0xbed0);
    }
}
