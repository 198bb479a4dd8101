//! Station-level routes and the handler list used by both targets.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::{BusTimer, CommandBus};
use crate::config::PollTiming;
use crate::coordination::ReentrancyGuard;
use crate::ezo::{CompensationRoles, refresh_registry};
use crate::sequencer::SequencerError;
use crate::sequencer::poll::MIN_POLL_INTERVAL;
use crate::station::Station;

use super::catalog::{self, Route};
use super::device::{DeviceController, DeviceList, Readings};
use super::{Dispatcher, Request, RequestHandler, Response, ResponseStatus};

#[derive(Deserialize)]
struct CadenceBody {
    interval_ms: u32,
}

#[derive(Serialize)]
struct CadenceReply {
    success: bool,
    interval_ms: u32,
}

/// Serves `GET /DEVICES`, `POST /data` and `POST /POLL`.
#[derive(Copy, Clone, Debug)]
pub struct StationController<'g> {
    guard: &'g ReentrancyGuard,
    roles: CompensationRoles,
    default_compensation: f32,
    minimum_interval: Duration,
}

impl<'g> StationController<'g> {
    pub const fn new(guard: &'g ReentrancyGuard, roles: CompensationRoles, timing: PollTiming) -> Self {
        Self {
            guard,
            roles,
            default_compensation: timing.default_compensation,
            minimum_interval: MIN_POLL_INTERVAL,
        }
    }

    async fn refresh<B, T, const N: usize>(&self, station: &mut Station<B, T, N>) -> Response
    where
        B: CommandBus,
        T: BusTimer,
    {
        let Some(_claim) = self.guard.try_acquire() else {
            return Response::failure(ResponseStatus::Busy, "bus busy");
        };

        let Station {
            registry,
            bus,
            timer,
        } = station;
        match refresh_registry(registry, self.roles, bus, timer, self.default_compensation).await {
            Some(_) => Response::json(ResponseStatus::Ok, &Readings(registry)),
            None => Response::failure(
                ResponseStatus::InternalError,
                "compensation devices are not configured",
            ),
        }
    }

    fn set_cadence(&self, body: &[u8]) -> Response {
        let interval_ms = match serde_json_core::from_slice::<CadenceBody>(body.trim_ascii()) {
            Ok((decoded, _)) => decoded.interval_ms,
            Err(err) => {
                return Response::failure(
                    ResponseStatus::InternalError,
                    format_args!("decode failed: {err}"),
                );
            }
        };

        let interval = Duration::from_millis(u64::from(interval_ms));
        if interval < self.minimum_interval {
            return Response::failure(
                ResponseStatus::Ok,
                SequencerError::CycleTooShort {
                    minimum: self.minimum_interval,
                },
            );
        }

        self.guard.request_cadence(interval);
        Response::json(
            ResponseStatus::Ok,
            &CadenceReply {
                success: true,
                interval_ms,
            },
        )
    }
}

impl<B, T, const N: usize> RequestHandler<Station<B, T, N>> for StationController<'_>
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
            Route::ListDevices => Some(Response::json(
                ResponseStatus::Ok,
                &DeviceList(&station.registry),
            )),
            Route::RefreshReadings => Some(self.refresh(station).await),
            Route::SetCadence => Some(self.set_cadence(request.body)),
            Route::IssueCommand | Route::FetchHelp | Route::FetchReadings => None,
        }
    }
}

/// Handler list entry; one concrete type keeps the dispatcher allocation-free.
#[derive(Copy, Clone, Debug)]
pub enum StationHandler<'g> {
    Device(DeviceController<'g>),
    Station(StationController<'g>),
}

impl<B, T, const N: usize> RequestHandler<Station<B, T, N>> for StationHandler<'_>
where
    B: CommandBus,
    T: BusTimer,
{
    async fn try_handle(
        &mut self,
        request: &Request<'_>,
        station: &mut Station<B, T, N>,
    ) -> Option<Response> {
        match self {
            StationHandler::Device(handler) => handler.try_handle(request, station).await,
            StationHandler::Station(handler) => handler.try_handle(request, station).await,
        }
    }
}

/// Builds the dispatcher: device control first, station routes second.
pub fn station_dispatcher(
    guard: &ReentrancyGuard,
    roles: CompensationRoles,
    timing: PollTiming,
) -> Dispatcher<StationHandler<'_>, 2> {
    let mut dispatcher = Dispatcher::new();
    // Capacity matches the handler count.
    let _ = dispatcher.register(StationHandler::Device(DeviceController::new(guard)));
    let _ = dispatcher.register(StationHandler::Station(StationController::new(
        guard, roles, timing,
    )));
    dispatcher
}
