use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::info;

use crate::limits::MAX_BULK_TRAINS;
use crate::model::*;
use crate::observability::Operation;

use super::route::{Leg, RouteError};
use super::{BookingEngine, BookingError, record, resolve_route};

fn summarize(train: &Train, date: NaiveDate, leg: Leg<'_>) -> TrainSummary {
    TrainSummary {
        prn: train.prn.clone(),
        name: train.name.clone(),
        departure: leg.departure(),
        arrival: leg.arrival(),
        free_seats: train.seats.get(date).map_or(0, SeatGrid::free_count),
    }
}

impl BookingEngine {
    /// Trains that run `source → destination` on `date`, ordered by PRN.
    pub async fn search_trains(
        &self,
        source: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<Vec<TrainSummary>, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<Vec<TrainSummary>, BookingError> = async {
            let trains = self.trains.find_all().await?;
            let found: Vec<TrainSummary> = trains
                .iter()
                .filter_map(|t| {
                    resolve_route(t, date, source, destination)
                        .ok()
                        .map(|leg| summarize(t, date, leg))
                })
                .collect();
            tracing::debug!(source, destination, %date, found = found.len(), "train search");
            Ok(found)
        }
        .await;
        record(Operation::Search, started, &result);
        result
    }

    /// Whether one train serves `source → destination` on `date`.
    pub async fn check_bookable(
        &self,
        prn: &Prn,
        source: &str,
        destination: &str,
        date: NaiveDate,
    ) -> Result<TrainSummary, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<TrainSummary, BookingError> = async {
            let train = self.load_train(prn).await?;
            let leg = resolve_route(&train, date, source, destination)?;
            Ok(summarize(&train, date, leg))
        }
        .await;
        record(Operation::CheckBookable, started, &result);
        result
    }

    pub async fn train_schedule(&self, prn: &Prn, date: NaiveDate) -> Result<Vec<Stop>, BookingError> {
        let train = self.load_train(prn).await?;
        train
            .schedules
            .get(date)
            .cloned()
            .ok_or(BookingError::InvalidRoute {
                reason: RouteError::NoSchedule(date),
            })
    }

    pub async fn seat_map(&self, prn: &Prn, date: NaiveDate) -> Result<SeatGrid, BookingError> {
        let train = self.load_train(prn).await?;
        train
            .seats
            .get(date)
            .cloned()
            .ok_or_else(|| BookingError::SeatGridNotFound { prn: prn.clone(), date })
    }

    // ── Admin path ───────────────────────────────────────────

    pub async fn add_train(&self, train: Train) -> Result<Train, BookingError> {
        let started = std::time::Instant::now();
        let result = self.insert_train(train).await;
        record(Operation::AddTrain, started, &result);
        result
    }

    async fn insert_train(&self, train: Train) -> Result<Train, BookingError> {
        train.validate().map_err(BookingError::InvalidTrain)?;
        let _admin = self.train_locks.lock(&train.prn).await;
        if self.trains.find_by_prn(&train.prn).await?.is_some() {
            return Err(BookingError::TrainAlreadyExists(train.prn));
        }
        let saved = self.trains.save(train).await?;
        info!(prn = %saved.prn, dates = saved.schedules.len(), "train added");
        Ok(saved)
    }

    /// Insert many trains. Every train is validated before any is stored;
    /// PRNs already known (or repeated in the batch) are skipped.
    pub async fn add_trains(&self, trains: Vec<Train>) -> Result<BulkInsert, BookingError> {
        let started = std::time::Instant::now();
        let result: Result<BulkInsert, BookingError> = async {
            if trains.len() > MAX_BULK_TRAINS {
                return Err(BookingError::LimitExceeded("too many trains in one batch"));
            }
            for train in &trains {
                train
                    .validate()
                    .map_err(|e| BookingError::InvalidTrain(format!("{}: {e}", train.prn)))?;
            }

            let mut report = BulkInsert::default();
            let mut seen = HashSet::new();
            for train in trains {
                if !seen.insert(train.prn.clone()) {
                    report.skipped.push(train.prn);
                    continue;
                }
                match self.insert_train(train).await {
                    Ok(saved) => report.added.push(saved.prn),
                    Err(BookingError::TrainAlreadyExists(prn)) => report.skipped.push(prn),
                    Err(e) => return Err(e),
                }
            }
            info!(added = report.added.len(), skipped = report.skipped.len(), "bulk train insert");
            Ok(report)
        }
        .await;
        record(Operation::AddTrains, started, &result);
        result
    }

    /// Replace a stored train. Waits for every affected (train, date) section,
    /// so no booking or cancellation on those dates is mid-flight.
    pub async fn update_train(&self, train: Train) -> Result<Train, BookingError> {
        let started = std::time::Instant::now();
        let result = self.replace_train(train).await;
        record(Operation::UpdateTrain, started, &result);
        result
    }

    async fn replace_train(&self, train: Train) -> Result<Train, BookingError> {
        train.validate().map_err(BookingError::InvalidTrain)?;
        let deadline = self.deadline();
        let _admin = self
            .train_locks
            .lock_until(&train.prn, deadline)
            .await
            .map_err(|_| BookingError::DeadlineExceeded)?;
        let stored = self.load_train(&train.prn).await?;

        let dates = stored.seats.dates().chain(train.seats.dates());
        let keys: Vec<(Prn, NaiveDate)> = dates.map(|d| (train.prn.clone(), d)).collect();
        let _sections = self
            .grid_locks
            .lock_many_until(keys, deadline)
            .await
            .map_err(|_| BookingError::DeadlineExceeded)?;
        Self::check_deadline(deadline)?;

        let saved = self.trains.save(train).await?;
        info!(prn = %saved.prn, dates = saved.schedules.len(), "train updated");
        Ok(saved)
    }
}
