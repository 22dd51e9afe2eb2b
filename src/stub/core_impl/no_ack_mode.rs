//! `QStartNoAckMode`: retire the `+`/`-` acknowledgement bytes.

use crate::arch::Isa;
use crate::stub::core_impl::HandlerStatus;
use crate::stub::core_impl::SessionFlags;
use crate::stub::core_impl::StubImpl;
use crate::stub::error::InternalError;

impl<I: Isa> StubImpl<I> {
    pub(crate) fn handle_no_ack_mode<E>(&mut self) -> Result<HandlerStatus, InternalError<E>> {
        // the ack for this very packet has already been sent; everything
        // after the OK reply travels unacknowledged in both directions
        self.flags.insert(SessionFlags::NO_ACK_MODE);
        info!("acknowledgement disabled for the remainder of the session");
        Ok(HandlerStatus::NeedsOk)
    }
}
