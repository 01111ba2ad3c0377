use std::collections::HashSet;
use thiserror::Error;

use crate::error::AppError;

pub const ROWS: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const SEATS_PER_ROW: u32 = 100;
pub const SEAT_SPACE: usize = ROWS.len() * SEATS_PER_ROW as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("seat space exhausted: requested {requested}, only {available} labels left")]
pub struct SeatSpaceExhausted {
    pub requested: usize,
    pub available: usize,
}

impl From<SeatSpaceExhausted> for AppError {
    fn from(err: SeatSpaceExhausted) -> Self {
        AppError::SeatSpaceExhausted {
            requested: err.requested,
            available: err.available,
        }
    }
}

/// Все метки мест в фиксированном порядке: A1..A100, B1..B100, ..., Z100.
pub fn seat_labels() -> impl Iterator<Item = String> {
    ROWS.iter()
        .flat_map(|row| (1..=SEATS_PER_ROW).map(move |n| format!("{}{}", *row as char, n)))
}

/// Выдает `n` свободных меток, пропуская занятые. Детерминировано.
/// Вызывать в той же транзакции, что и вставку билетов, под блокировкой типа.
pub fn allocate_seats(used: &HashSet<String>, n: usize) -> Result<Vec<String>, SeatSpaceExhausted> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let mut seats = Vec::with_capacity(n);
    for label in seat_labels() {
        if used.contains(&label) {
            continue;
        }
        seats.push(label);
        if seats.len() == n {
            return Ok(seats);
        }
    }

    Err(SeatSpaceExhausted {
        requested: n,
        available: seats.len(),
    })
}
