//! Forward and reverse replay over the retired-instruction trace.
//!
//! Each operation advances (or rewinds) the cursor one committed instruction
//! at a time, asking the point sets after every move whether to halt. The
//! continue variants poll for the client's out-of-band interrupt byte at a
//! fixed instruction stride, so an attention from the debugger stops the
//! replay within a bounded window.

use crate::arch::Isa;
use crate::common::Signal;
use crate::shadow::PointMatch;
use crate::shadow::ShadowError;
use crate::shadow::ShadowSystem;
use crate::shadow::WatchKind;

/// How many retired instructions a continue processes between interrupt
/// polls.
pub const INTERRUPT_POLL_PERIOD: usize = 1024;

/// Which edge of the replay log execution ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayLogPosition {
    Begin,
    End,
}

/// Why a replay operation came to rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop<U> {
    /// No instruction has been replayed yet (the state the server starts
    /// in). Reported like a `DoneStep` stop.
    Initial,
    /// The requested step count was exhausted without a point firing.
    DoneStep { hart: usize },
    /// The DUT retired an illegal instruction.
    Illegal { hart: usize },
    /// The instruction bytes decode to the architecture's breakpoint trap.
    SwBreak { hart: usize },
    /// A registered hardware breakpoint fired.
    HwBreak { hart: usize },
    /// A registered watchpoint fired.
    Watch {
        hart: usize,
        kind: WatchKind,
        addr: U,
    },
    /// The cursor reached an edge of the recording.
    LogEdge(ReplayLogPosition),
    /// The client's interrupt byte arrived mid-continue.
    Interrupted,
}

impl<U> Stop<U> {
    /// The POSIX signal paired with this stop reason.
    pub fn signal(&self) -> Signal {
        match self {
            Stop::Illegal { .. } => Signal::SIGILL,
            Stop::Interrupted => Signal::SIGINT,
            _ => Signal::SIGTRAP,
        }
    }

    /// The hart the stop is attributed to, if any.
    pub fn hart(&self) -> Option<usize> {
        match *self {
            Stop::DoneStep { hart }
            | Stop::Illegal { hart }
            | Stop::SwBreak { hart }
            | Stop::HwBreak { hart }
            | Stop::Watch { hart, .. } => Some(hart),
            _ => None,
        }
    }
}

impl<I: Isa> ShadowSystem<I> {
    /// Apply up to `n` instructions, stopping early on a point hit or the
    /// end of the recording.
    pub fn step_forward(&mut self, n: u64) -> Result<Stop<I::Xlen>, ShadowError> {
        self.run(Dir::Forward, Some(n), || false)
    }

    /// Undo up to `n` instructions, stopping early on a point hit or the
    /// beginning of the recording.
    pub fn step_reverse(&mut self, n: u64) -> Result<Stop<I::Xlen>, ShadowError> {
        self.run(Dir::Reverse, Some(n), || false)
    }

    /// Apply instructions until a point fires, the recording ends, or
    /// `poll_interrupt` reports the client's attention.
    pub fn continue_forward(
        &mut self,
        poll_interrupt: impl FnMut() -> bool,
    ) -> Result<Stop<I::Xlen>, ShadowError> {
        self.run(Dir::Forward, None, poll_interrupt)
    }

    /// The reverse analogue of [`continue_forward`](Self::continue_forward).
    pub fn continue_reverse(
        &mut self,
        poll_interrupt: impl FnMut() -> bool,
    ) -> Result<Stop<I::Xlen>, ShadowError> {
        self.run(Dir::Reverse, None, poll_interrupt)
    }

    fn run(
        &mut self,
        dir: Dir,
        mut budget: Option<u64>,
        mut poll_interrupt: impl FnMut() -> bool,
    ) -> Result<Stop<I::Xlen>, ShadowError> {
        let mut since_poll = 0usize;
        let mut last_hart = 0usize;

        let stop = loop {
            if budget == Some(0) {
                break Stop::DoneStep { hart: last_hart };
            }

            let idx = match dir {
                Dir::Forward => {
                    if self.cursor() >= self.trace_len() {
                        break Stop::LogEdge(ReplayLogPosition::End);
                    }
                    self.apply_next()?
                }
                Dir::Reverse => {
                    if self.cursor() == 0 {
                        break Stop::LogEdge(ReplayLogPosition::Begin);
                    }
                    self.unapply_prev()?
                }
            };

            let ret = self.record(idx).expect("replayed record exists");
            let hart = ret.hart as usize;
            last_hart = hart;

            let hit = self
                .core(hart)?
                .points
                .match_retired::<I>(ret)
                .or_else(|| self.points.match_retired::<I>(ret));

            if let Some(hit) = hit {
                break match hit {
                    PointMatch::Illegal => Stop::Illegal { hart },
                    PointMatch::SwBreak => Stop::SwBreak { hart },
                    PointMatch::HwBreak => Stop::HwBreak { hart },
                    PointMatch::Watch { kind, addr } => Stop::Watch { hart, kind, addr },
                };
            }

            if let Some(n) = budget.as_mut() {
                *n -= 1;
            }

            since_poll += 1;
            if since_poll >= INTERRUPT_POLL_PERIOD {
                since_poll = 0;
                if poll_interrupt() {
                    break Stop::Interrupted;
                }
            }
        };

        if let Some(hart) = stop.hart() {
            self.core_mut(hart)?.signal = stop.signal();
        }
        self.last_stop = stop;
        Ok(stop)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dir {
    Forward,
    Reverse,
}
