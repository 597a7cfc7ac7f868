//! Hard limits enforced on the admin path and on every workflow.

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GRID_ROWS: usize = 200;
pub const MAX_GRID_COLS: usize = 26;
pub const MAX_STOPS_PER_SCHEDULE: usize = 256;
pub const MAX_SCHEDULED_DATES: usize = 1024;
pub const MAX_SEATS_PER_BOOKING: usize = 64;
pub const MAX_BULK_TRAINS: usize = 1000;
pub const MAX_EMAIL_LEN: usize = 320;
