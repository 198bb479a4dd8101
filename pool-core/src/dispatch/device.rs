//! Device-control handler: explicit commands, help text and cached readings.

use core::ops::Add;
use core::time::Duration;

use serde::Deserialize;
use serde::ser::{Serialize, SerializeSeq, SerializeStruct, Serializer};

use crate::bus::{BusTimer, CommandBus};
use crate::coordination::ReentrancyGuard;
use crate::ezo::{Classification, CommandTarget, normalize};
use crate::registry::{PeripheralRegistry, RegistryError};
use crate::station::Station;

use super::catalog::{self, HELP_LINES, Route};
use super::{Request, RequestHandler, Response, ResponseStatus};

/// Structured body of `POST /CMD`.
#[derive(Deserialize)]
struct CommandBody<'a> {
    #[serde(borrow, default)]
    device: Option<&'a str>,
    command: &'a str,
}

/// Decoded command request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommandRequest<'a> {
    pub target: CommandTarget<'a>,
    pub command: &'a str,
    /// Came from the `"device:command"` string form, whose device names ignore case.
    pub shorthand: bool,
}

impl<'a> CommandRequest<'a> {
    /// Decodes either `{"device":..,"command":..}` or the `"device:command"` string.
    ///
    /// # Errors
    ///
    /// Returns the JSON decoder's error for anything else.
    pub fn decode(body: &'a [u8]) -> Result<Self, serde_json_core::de::Error> {
        let body = body.trim_ascii();
        if body.first() == Some(&b'"') {
            let (text, _) = serde_json_core::from_slice::<&str>(body)?;
            return Ok(match text.split_once(':') {
                Some((device, command)) => Self {
                    target: CommandTarget::Named(device.trim()),
                    command,
                    shorthand: true,
                },
                None => Self {
                    target: CommandTarget::Default,
                    command: text,
                    shorthand: true,
                },
            });
        }

        let (decoded, _) = serde_json_core::from_slice::<CommandBody<'_>>(body)?;
        Ok(Self {
            target: decoded.device.map_or(CommandTarget::Default, CommandTarget::Named),
            command: decoded.command,
            shorthand: false,
        })
    }

    /// Resolves the target peripheral.
    ///
    /// # Errors
    ///
    /// See [`PeripheralRegistry::resolve`].
    pub fn resolve<TInstant, const N: usize>(
        &self,
        registry: &PeripheralRegistry<TInstant, N>,
    ) -> Result<usize, RegistryError>
    where
        TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
    {
        match self.target {
            CommandTarget::Named(name) if self.shorthand => registry
                .index_of_ignore_case(name)
                .ok_or(RegistryError::NotFound),
            target => registry.resolve(target),
        }
    }
}

#[derive(serde::Serialize)]
struct CommandReply<'a> {
    success: bool,
    device: &'a str,
    command: &'a str,
    status: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Serializes each peripheral's last reading keyed by its name.
pub struct Readings<'a, TInstant, const N: usize>(pub &'a PeripheralRegistry<TInstant, N>);

impl<TInstant, const N: usize> Serialize for Readings<'_, TInstant, N>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut readings = serializer.serialize_struct("Readings", N)?;
        for peripheral in self.0.iter() {
            readings.serialize_field(peripheral.name(), &peripheral.last_reading())?;
        }
        readings.end()
    }
}

#[derive(serde::Serialize)]
struct DeviceEntry {
    name: &'static str,
    address: u8,
}

/// Serializes the registry as `[{"name":..,"address":..}]`.
pub struct DeviceList<'a, TInstant, const N: usize>(pub &'a PeripheralRegistry<TInstant, N>);

impl<TInstant, const N: usize> Serialize for DeviceList<'_, TInstant, N>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut devices = serializer.serialize_seq(Some(N))?;
        for peripheral in self.0.iter() {
            devices.serialize_element(&DeviceEntry {
                name: peripheral.name(),
                address: peripheral.address(),
            })?;
        }
        devices.end()
    }
}

/// Serves `POST /CMD`, `GET /HELP` and `GET /data`.
#[derive(Copy, Clone, Debug)]
pub struct DeviceController<'g> {
    guard: &'g ReentrancyGuard,
}

impl<'g> DeviceController<'g> {
    pub const fn new(guard: &'g ReentrancyGuard) -> Self {
        Self { guard }
    }

    async fn issue_command<B, T, const N: usize>(
        &self,
        body: &[u8],
        station: &mut Station<B, T, N>,
    ) -> Response
    where
        B: CommandBus,
        T: BusTimer,
    {
        let request = match CommandRequest::decode(body) {
            Ok(request) => request,
            Err(err) => {
                return Response::failure(
                    ResponseStatus::InternalError,
                    format_args!("decode failed: {err}"),
                );
            }
        };
        let index = match request.resolve(&station.registry) {
            Ok(index) => index,
            Err(err) => return Response::failure(ResponseStatus::NotFound, err),
        };
        let text = match normalize(request.command) {
            Ok(text) => text,
            Err(err) => return Response::failure(ResponseStatus::InternalError, err),
        };

        let Some(_claim) = self.guard.try_acquire() else {
            return Response::failure(ResponseStatus::Busy, "bus busy");
        };

        let Station {
            registry,
            bus,
            timer,
        } = station;
        let Some(peripheral) = registry.get_mut(index) else {
            return Response::failure(ResponseStatus::NotFound, RegistryError::NotFound);
        };

        peripheral.settle(bus, timer).await;
        peripheral.send_command(bus, &text, timer.now());
        let outcome = peripheral.await_and_classify(bus, timer).await;

        Response::json(
            ResponseStatus::Ok,
            &CommandReply {
                success: outcome.is_success(),
                device: peripheral.name(),
                command: &text,
                status: outcome,
                response: outcome.is_success().then(|| peripheral.last_response()),
                message: (!outcome.is_success()).then(|| outcome.message()),
            },
        )
    }
}

impl<B, T, const N: usize> RequestHandler<Station<B, T, N>> for DeviceController<'_>
where
    B: CommandBus,
    T: BusTimer,
{
    async fn try_handle(
        &mut self,
        request: &Request<'_>,
        station: &mut Station<B, T, N>,
    ) -> Option<Response> {
        let spec = catalog::find(request.method, request.path)?;
        match spec.route {
            Route::IssueCommand => Some(self.issue_command(request.body, station).await),
            Route::FetchHelp => Some(Response::json(ResponseStatus::Ok, &HELP_LINES)),
            Route::FetchReadings => Some(Response::json(
                ResponseStatus::Ok,
                &Readings(&station.registry),
            )),
            Route::RefreshReadings | Route::ListDevices | Route::SetCadence => None,
        }
    }
}
