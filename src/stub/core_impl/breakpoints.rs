//! `z` / `Z`: breakpoint and watchpoint insertion/removal.
//!
//! Points land in the point set of the currently selected core. Removal of
//! an absent point is reported as success, matching what clients expect
//! when they tear a session down.

use crate::arch::Isa;
use num_traits::FromPrimitive;
use num_traits::ToPrimitive;
use crate::protocol::commands::Command;
use crate::shadow::PointType;
use crate::shadow::ShadowSystem;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_breakpoints<E>(
        &mut self,
        sys: &mut ShadowSystem<I>,
        command: Command<'_>,
    ) -> Result<HandlerStatus, InternalError<E>> {
        let hart = self.current_hart();

        let (insert, type_, addr, kind) = match command {
            Command::Z { type_, addr, kind } => (true, type_, addr, kind),
            Command::z { type_, addr, kind } => (false, type_, addr, kind),
            _ => unreachable!("routed by dispatch"),
        };

        let type_ = match PointType::from_wire(type_) {
            Some(t) => t,
            // unknown point types get the empty "unsupported" reply
            None => return Ok(HandlerStatus::Handled),
        };
        let addr = I::Xlen::from_u64(addr).ok_or_else(InternalError::malformed)?;

        let points = &mut sys.core_mut(hart)?.points;
        if insert {
            points.insert(type_, addr, kind);
            debug!("inserted {:?} point at {:#x}", type_, addr.to_u64().unwrap_or(0));
        } else {
            let removed = points.remove(type_, addr);
            debug!(
                "removed {:?} point at {:#x} (present: {})",
                type_,
                addr.to_u64().unwrap_or(0),
                removed
            );
        }

        Ok(HandlerStatus::NeedsOk)
    }
}
