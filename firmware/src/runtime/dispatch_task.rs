use core::str;

use defmt::Display2Format;
use heapless::{String, Vec};
use pool_core::config::PollTiming;
use pool_core::dispatch::{
    DispatchOutcome, MAX_RESPONSE_BODY, Response, ResponseStatus, parse_request, station_dispatcher,
};
use pool_core::ezo::CompensationRoles;

use super::{GUARD, REQUESTS, RESPONSES, StationLock};
use crate::link::RequestFrame;
use crate::usb::MAX_PACKET_SIZE;

/// Room for the status line, headers and the largest body.
const RESPONSE_TEXT_LEN: usize = MAX_RESPONSE_BODY + 128;

#[embassy_executor::task]
pub async fn run(station: &'static StationLock, roles: CompensationRoles, timing: PollTiming) -> ! {
    let requests = REQUESTS.receiver();
    let responses = RESPONSES.sender();
    let mut dispatcher = station_dispatcher(&GUARD, roles, timing);
    let mut text: String<RESPONSE_TEXT_LEN> = String::new();

    loop {
        let frame = requests.receive().await;
        let outcome = match decode(&frame) {
            Some(request_text) => match parse_request(request_text) {
                Ok(request) => {
                    defmt::info!(
                        "dispatch: {=str} {=str}",
                        request.method.as_str(),
                        request.path
                    );
                    let mut station = station.lock().await;
                    dispatcher.dispatch(&request, &mut *station).await
                }
                Err(err) => {
                    defmt::warn!("dispatch: rejected request: {}", Display2Format(&err));
                    DispatchOutcome::Unhandled
                }
            },
            None => DispatchOutcome::Unhandled,
        };

        let response = match outcome {
            DispatchOutcome::Handled(response) => response,
            DispatchOutcome::Unhandled => Response::empty(ResponseStatus::NotFound),
        };
        defmt::debug!("dispatch: {=u16}", response.status.code());

        text.clear();
        if response.write_http(&mut text).is_err() {
            defmt::warn!("dispatch: response truncated");
        }
        for chunk in text.as_bytes().chunks(usize::from(MAX_PACKET_SIZE)) {
            responses
                .send(Vec::from_slice(chunk).unwrap_or_default())
                .await;
        }
    }
}

fn decode(frame: &RequestFrame) -> Option<&str> {
    str::from_utf8(frame)
        .inspect_err(|_| defmt::warn!("dispatch: request is not UTF-8"))
        .ok()
}
