//! Route table and help text.
//!
//! Handlers look requests up here instead of comparing paths inline, so the
//! help output and the routing stay in sync.

use super::request::Method;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    IssueCommand,
    FetchHelp,
    FetchReadings,
    RefreshReadings,
    ListDevices,
    SetCadence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteSpec {
    pub method: Method,
    pub path: &'static str,
    pub route: Route,
    pub summary: &'static str,
}

impl RouteSpec {
    const fn new(method: Method, path: &'static str, route: Route, summary: &'static str) -> Self {
        Self {
            method,
            path,
            route,
            summary,
        }
    }
}

pub static ROUTES: [RouteSpec; 6] = [
    RouteSpec::new(
        Method::Post,
        "/CMD",
        Route::IssueCommand,
        "send a command to one device",
    ),
    RouteSpec::new(
        Method::Get,
        "/HELP",
        Route::FetchHelp,
        "list calibration commands",
    ),
    RouteSpec::new(
        Method::Get,
        "/data",
        Route::FetchReadings,
        "last reading of every device",
    ),
    RouteSpec::new(
        Method::Post,
        "/data",
        Route::RefreshReadings,
        "take a fresh compensated reading",
    ),
    RouteSpec::new(
        Method::Get,
        "/DEVICES",
        Route::ListDevices,
        "device names and bus addresses",
    ),
    RouteSpec::new(
        Method::Post,
        "/POLL",
        Route::SetCadence,
        "change the polling interval",
    ),
];

/// Calibration commands accepted by `POST /CMD`, in `device:command` shorthand.
pub const HELP_LINES: [&str; 8] = [
    "ph:cal,mid,7     calibrate to pH 7",
    "ph:cal,low,4     calibrate to pH 4",
    "ph:cal,high,10   calibrate to pH 10",
    "ph:cal,clear     clear calibration",
    "orp:cal,225          calibrate orp probe to 225mV",
    "orp:cal,clear        clear calibration",
    "rtd:cal,t            calibrate the temp probe to any temp value",
    "rtd:cal,clear        clear calibration",
];

/// Finds the route for an exact method and case-sensitive path.
pub fn find(method: Method, path: &str) -> Option<&'static RouteSpec> {
    ROUTES
        .iter()
        .find(|spec| spec.method == method && spec.path == path)
}
