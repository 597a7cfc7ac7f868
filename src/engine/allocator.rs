use crate::model::{Seat, SeatGrid};

use super::BookingError;

/// Choose `requested` free seats from `grid` without modifying it.
///
/// The grid is scanned in row-major order (runs continue across row ends).
/// The first run of `requested` consecutive free cells wins; when there is
/// none, the first `requested` free cells are taken wherever they are.
pub fn allocate(grid: &SeatGrid, requested: usize) -> Result<Vec<Seat>, BookingError> {
    let available = grid.free_count();
    if requested > available {
        return Err(BookingError::NotEnoughSeats { requested, available });
    }
    if requested == 0 {
        return Ok(Vec::new());
    }
    if let Some(end) = first_run_end(grid.cells(), requested) {
        return Ok((end + 1 - requested..=end).map(|i| grid.seat_at(i)).collect());
    }
    Ok(grid
        .cells()
        .iter()
        .enumerate()
        .filter(|(_, booked)| !**booked)
        .take(requested)
        .map(|(i, _)| grid.seat_at(i))
        .collect())
}

/// Index of the last cell of the first run of `len` free cells.
fn first_run_end(cells: &[bool], len: usize) -> Option<usize> {
    let mut run = 0;
    for (i, &booked) in cells.iter().enumerate() {
        if booked {
            run = 0;
            continue;
        }
        run += 1;
        if run == len {
            return Some(i);
        }
    }
    None
}
