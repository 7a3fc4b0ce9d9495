//! Message identifier allocation and incoming-id validation.
//!
//! Outgoing ids encode corrected time in the upper half and must be
//! strictly increasing multiples of 4. Incoming ids carry server parity
//! (1 or 3 mod 4), must land inside a freshness window around corrected
//! time and must advance a high-water mark; ids inside a container are
//! checked against the container id instead of the mark.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Accept ids whose embedded time is at most this many seconds behind.
const MAX_AGE_SECS: i64 = 300;
/// Accept ids whose embedded time is at most this many seconds ahead.
const MAX_SKEW_SECS: i64 = 30;

/// Rejection reasons for an incoming message id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MsgIdError {
    /// Embedded timestamp more than five minutes old.
    TooOld { msg_id: i64 },
    /// Embedded timestamp more than thirty seconds in the future.
    TooNew { msg_id: i64 },
    /// Server ids must be 1 or 3 modulo 4.
    BadParity { msg_id: i64 },
    /// Not strictly greater than the newest id already accepted.
    NotIncreasing { msg_id: i64, newest: i64 },
    /// An id inside a container must precede the container's own id.
    ContainerOrder { msg_id: i64, container_id: i64 },
}

impl fmt::Display for MsgIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooOld { msg_id } => write!(f, "msg_id {msg_id} is too old"),
            Self::TooNew { msg_id } => write!(f, "msg_id {msg_id} is too far in the future"),
            Self::BadParity { msg_id } => write!(f, "msg_id {msg_id} has client parity"),
            Self::NotIncreasing { msg_id, newest } => {
                write!(f, "msg_id {msg_id} does not advance past {newest}")
            }
            Self::ContainerOrder { msg_id, container_id } => {
                write!(f, "msg_id {msg_id} not below container id {container_id}")
            }
        }
    }
}

impl std::error::Error for MsgIdError {}

pub(crate) fn now_parts() -> (u64, u32) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs(), now.subsec_nanos())
}

/// Allocates outgoing message ids from corrected time.
#[derive(Clone, Debug, Default)]
pub struct MsgIdGen {
    time_offset: i32,
    last_msg_id: i64,
}

impl MsgIdGen {
    pub fn new(time_offset: i32) -> Self {
        Self {
            time_offset,
            last_msg_id: 0,
        }
    }

    /// Updates the clock correction learned from the handshake or a
    /// `bad_msg_notification`.
    pub fn set_time_offset(&mut self, time_offset: i32) {
        self.time_offset = time_offset;
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    /// Next id from the system clock.
    pub fn next(&mut self) -> i64 {
        let (secs, nanos) = now_parts();
        self.do_next(secs, nanos)
    }

    /// Deterministic core: `(corrected_secs << 32) | (nanos << 2)`,
    /// bumped by 4 whenever the clock alone would not advance.
    pub fn do_next(&mut self, secs: u64, nanos: u32) -> i64 {
        let secs = (secs as i64 + self.time_offset as i64) as u64;
        let mut id = ((secs << 32) | ((nanos as u64) << 2)) as i64;
        if self.last_msg_id >= id {
            id = self.last_msg_id + 4;
        }
        self.last_msg_id = id;
        id
    }
}

/// Validates incoming (server) message ids.
#[derive(Clone, Debug, Default)]
pub struct MsgIdValidator {
    newest: i64,
}

impl MsgIdValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks a top-level incoming id and advances the high-water mark.
    pub fn check(&mut self, msg_id: i64, now_secs: u64, time_offset: i32) -> Result<(), MsgIdError> {
        check_parity(msg_id)?;
        let msg_time = (msg_id as u64 >> 32) as i64;
        let now = now_secs as i64 + time_offset as i64;
        if msg_time < now - MAX_AGE_SECS {
            return Err(MsgIdError::TooOld { msg_id });
        }
        if msg_time > now + MAX_SKEW_SECS {
            return Err(MsgIdError::TooNew { msg_id });
        }
        if msg_id <= self.newest {
            return Err(MsgIdError::NotIncreasing {
                msg_id,
                newest: self.newest,
            });
        }
        self.newest = msg_id;
        Ok(())
    }

    /// Checks an id carried inside a container. The freshness window and
    /// the high-water mark do not apply; ordering relative to the
    /// container does.
    pub fn check_container_inner(msg_id: i64, container_id: i64) -> Result<(), MsgIdError> {
        check_parity(msg_id)?;
        if msg_id >= container_id {
            return Err(MsgIdError::ContainerOrder {
                msg_id,
                container_id,
            });
        }
        Ok(())
    }

    pub fn newest(&self) -> i64 {
        self.newest
    }
}

fn check_parity(msg_id: i64) -> Result<(), MsgIdError> {
    match msg_id.rem_euclid(4) {
        1 | 3 => Ok(()),
        _ => Err(MsgIdError::BadParity { msg_id }),
    }
}
