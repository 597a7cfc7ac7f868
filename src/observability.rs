use std::net::SocketAddr;

// ── RED metrics (workflow-driven) ───────────────────────────────

/// Counter: workflows run. Labels: operation, status.
pub const WORKFLOWS_TOTAL: &str = "seatline_workflows_total";

/// Histogram: workflow latency in seconds. Labels: operation.
pub const WORKFLOW_DURATION_SECONDS: &str = "seatline_workflow_duration_seconds";

// ── Inventory ───────────────────────────────────────────────────

/// Counter: seats flipped free → booked.
pub const SEATS_ALLOCATED_TOTAL: &str = "seatline_seats_allocated_total";

/// Counter: seats flipped booked → free.
pub const SEATS_RELEASED_TOTAL: &str = "seatline_seats_released_total";

/// Counter: grid commits rejected for a stale version.
pub const GRID_CONFLICTS_TOTAL: &str = "seatline_grid_conflicts_total";

/// Histogram: time spent waiting for a (train, date) section, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "seatline_lock_wait_seconds";

// ── USE metrics (storage) ───────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatline_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Workflow names used as the `operation` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    CheckBookable,
    Book,
    Cancel,
    Reschedule,
    ListTickets,
    FindTicket,
    AddTrain,
    AddTrains,
    UpdateTrain,
    RegisterUser,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::Search => "search_trains",
            Operation::CheckBookable => "check_bookable",
            Operation::Book => "book_ticket",
            Operation::Cancel => "cancel_ticket",
            Operation::Reschedule => "reschedule_ticket",
            Operation::ListTickets => "list_tickets",
            Operation::FindTicket => "find_ticket",
            Operation::AddTrain => "add_train",
            Operation::AddTrains => "add_trains",
            Operation::UpdateTrain => "update_train",
            Operation::RegisterUser => "register_user",
        }
    }
}
