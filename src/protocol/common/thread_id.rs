use core::num::NonZeroUsize;

use super::decode_hex;

/// Tid/Pid selector.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum IdKind {
    /// All threads (`-1`)
    All,
    /// Any thread (`0`)
    Any,
    /// Thread with a specific ID (id > 0)
    WithId(NonZeroUsize),
}

/// A thread ID as it appears in `H`, `T` and `vCont` packets.
///
/// The `p<pid>.<tid>` form is only sent when the `multiprocess` feature was
/// negotiated; the bare `<tid>` form is used otherwise.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ThreadId {
    /// Process ID (present in the multiprocess syntax only).
    pub pid: Option<IdKind>,
    /// Thread ID.
    pub tid: IdKind,
}

impl TryFrom<&[u8]> for ThreadId {
    type Error = ();

    fn try_from(s: &[u8]) -> Result<Self, ()> {
        match s {
            [b'p', s @ ..] => {
                // p<pid>.<tid>
                let mut s = s.split(|b| *b == b'.');
                let pid: IdKind = s.next().ok_or(())?.try_into()?;
                let tid: IdKind = match s.next() {
                    Some(s) => s.try_into()?,
                    // a lone p<pid> is valid, and addresses every thread in it
                    None => IdKind::All,
                };

                Ok(ThreadId {
                    pid: Some(pid),
                    tid,
                })
            }
            _ => {
                // <tid>
                let tid: IdKind = s.try_into()?;

                Ok(ThreadId { pid: None, tid })
            }
        }
    }
}

impl TryFrom<&[u8]> for IdKind {
    type Error = ();

    fn try_from(s: &[u8]) -> Result<Self, ()> {
        Ok(match s {
            b"-1" => IdKind::All,
            b"0" => IdKind::Any,
            id => IdKind::WithId(NonZeroUsize::new(decode_hex(id).map_err(drop)?).ok_or(())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_tid() {
        let id = ThreadId::try_from(b"1".as_slice()).unwrap();
        assert_eq!(id.pid, None);
        assert_eq!(id.tid, IdKind::WithId(NonZeroUsize::new(1).unwrap()));
    }

    #[test]
    fn multiprocess_syntax() {
        let id = ThreadId::try_from(b"p1.2".as_slice()).unwrap();
        assert_eq!(id.pid, Some(IdKind::WithId(NonZeroUsize::new(1).unwrap())));
        assert_eq!(id.tid, IdKind::WithId(NonZeroUsize::new(2).unwrap()));

        let id = ThreadId::try_from(b"p-1".as_slice()).unwrap();
        assert_eq!(id.pid, Some(IdKind::All));
        assert_eq!(id.tid, IdKind::All);
    }

    #[test]
    fn any_and_all() {
        assert_eq!(ThreadId::try_from(b"0".as_slice()).unwrap().tid, IdKind::Any);
        assert_eq!(ThreadId::try_from(b"-1".as_slice()).unwrap().tid, IdKind::All);
    }
}
