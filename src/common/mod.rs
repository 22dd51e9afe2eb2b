//! Types shared across the wire protocol and the shadow machine.

mod signal;

pub use signal::Signal;

/// Thread ID.
///
/// The server exposes one thread per simulated core, numbered from 1, so a
/// `Tid` is always non-zero.
pub type Tid = core::num::NonZeroUsize;

/// Process ID.
///
/// Only reported when the client negotiated the `multiprocess` feature.
pub type Pid = core::num::NonZeroUsize;

/// The `Tid` of the only thread on a single-core target.
pub const SINGLE_THREAD_TID: Tid = match Tid::new(1) {
    Some(tid) => tid,
    None => unreachable!(),
};

/// The `Pid` reported to clients that negotiated `multiprocess`.
///
/// There is only ever one simulated SoC per server, so a fixed PID suffices.
pub const FAKE_PID: Pid = match Pid::new(1) {
    Some(pid) => pid,
    None => unreachable!(),
};

/// Turn a 0-based hart index into the thread ID reported on the wire.
pub fn hart_to_tid(hart: usize) -> Tid {
    // 1-based; hart counts are tiny, so this cannot wrap
    Tid::new(hart + 1).unwrap_or(SINGLE_THREAD_TID)
}
