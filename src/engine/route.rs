use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{Stop, Train};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no schedule on {0}")]
    NoSchedule(NaiveDate),
    #[error("station {0} is not on the route")]
    UnknownStation(String),
    #[error("{from} does not come before {to}")]
    NotBefore { from: String, to: String },
}

/// A validated journey segment on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leg<'a> {
    pub from: &'a Stop,
    pub to: &'a Stop,
}

impl Leg<'_> {
    pub fn departure(&self) -> NaiveDateTime {
        self.from.arrival
    }

    pub fn arrival(&self) -> NaiveDateTime {
        self.to.arrival
    }
}

/// Position of the first stop named `station`, ignoring case.
fn position(stops: &[Stop], station: &str) -> Option<usize> {
    let wanted = station.to_lowercase();
    stops.iter().position(|s| s.station.to_lowercase() == wanted)
}

fn stops_on(train: &Train, date: NaiveDate) -> Result<&[Stop], RouteError> {
    train
        .schedules
        .get(date)
        .map(Vec::as_slice)
        .ok_or(RouteError::NoSchedule(date))
}

/// Resolve `source → destination` on `date`. Valid only when both stations are
/// scheduled that day and the source's first occurrence strictly precedes the
/// destination's.
pub fn resolve_route<'a>(
    train: &'a Train,
    date: NaiveDate,
    source: &str,
    destination: &str,
) -> Result<Leg<'a>, RouteError> {
    let stops = stops_on(train, date)?;
    let from = position(stops, source).ok_or_else(|| RouteError::UnknownStation(source.to_string()))?;
    let to = position(stops, destination)
        .ok_or_else(|| RouteError::UnknownStation(destination.to_string()))?;
    if from >= to {
        return Err(RouteError::NotBefore {
            from: source.to_string(),
            to: destination.to_string(),
        });
    }
    Ok(Leg {
        from: &stops[from],
        to: &stops[to],
    })
}

pub fn is_valid_route(train: &Train, date: NaiveDate, source: &str, destination: &str) -> bool {
    resolve_route(train, date, source, destination).is_ok()
}

/// Scheduled arrival at `station` on `date`.
pub fn arrival_time(train: &Train, date: NaiveDate, station: &str) -> Result<NaiveDateTime, RouteError> {
    let stops = stops_on(train, date)?;
    position(stops, station)
        .map(|i| stops[i].arrival)
        .ok_or_else(|| RouteError::UnknownStation(station.to_string()))
}
