//! Error taxonomy shared by every peerwire component.
//!
//! Each module defines its own concrete error enum next to the code that
//! raises it. Callers that only need to decide what to do next branch on
//! the abstract `ErrorKind`:
//!
//!   Parse           malformed inbound data. Discard it, keep the peer.
//!   ResourceLimit   a per-host or total limit was hit. Reject this request only.
//!   RetryExhausted  the operation already failed once for this source. Do not retry.
//!   Timeout         the operation did not finish in time. Caller may retry later.
//!   Failed          the operation failed outright (I/O, bad input).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    ResourceLimit,
    RetryExhausted,
    Timeout,
    Failed,
}
