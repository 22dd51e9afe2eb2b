//! Parsing of packet bodies into typed commands.
//!
//! Address, length and register-number fields are parsed into `u64` here;
//! handlers narrow them to the target's `XLEN` (rejecting overlarge values)
//! so that the parser itself stays architecture-independent.

use crate::common::Signal;
use crate::protocol::common::decode_hex;
use crate::protocol::common::decode_hex_buf;
use crate::protocol::common::thread_id::ThreadId;
use crate::protocol::packet::PacketBuf;
use crate::protocol::packet::PacketParseError;

/// Which register set an `H` packet selects a thread for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HOp {
    /// `Hc`: step/continue operations.
    StepContinue,
    /// `Hg`: everything else (register and memory access).
    Other,
}

/// A single action within a `vCont` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VContAction {
    pub kind: VContKind,
    /// Action applies to all threads when absent.
    pub thread: Option<ThreadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VContKind {
    Continue,
    ContinueWithSig(Signal),
    Step,
    StepWithSig(Signal),
}

/// A decoded command, named after its wire syntax.
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    // register access
    g,
    G { vals: &'a [u8] },
    p { reg: u64 },
    P { reg: u64, val: &'a [u8] },

    // memory access (hex and binary forms)
    m { addr: u64, len: u64 },
    M { addr: u64, val: &'a [u8] },
    x { addr: u64, len: u64 },
    X { addr: u64, val: &'a [u8] },

    // execution
    s { addr: Option<u64> },
    S { sig: Signal, addr: Option<u64> },
    c { addr: Option<u64> },
    C { sig: Signal, addr: Option<u64> },
    bc,
    bs,
    vCont_query,
    vCont { actions: Vec<VContAction> },
    vCtrlC,

    // stop reason and threads
    QuestionMark,
    H { op: HOp, thread: ThreadId },
    T { thread: ThreadId },
    qC,
    qfThreadInfo,
    qsThreadInfo,
    qAttached,

    // session and features
    qSupported { features: &'a [u8] },
    QStartNoAckMode,
    QEnableErrorStrings,
    qRcmd { cmd: &'a [u8] },
    qXferFeaturesRead { annex: &'a [u8], offset: u64, len: u64 },

    // breakpoints and watchpoints
    z { type_: u8, addr: u64, kind: u64 },
    Z { type_: u8, addr: u64, kind: u64 },

    // lifecycle
    ExclamationMark,
    R,
    D,
    k,

    /// Anything the server doesn't understand; answered with the empty
    /// packet, which tells the client the command is unsupported.
    Unknown,
}

use PacketParseError::MalformedCommand;

impl<'a> Command<'a> {
    pub fn from_packet(buf: PacketBuf<'a>) -> Result<Command<'a>, PacketParseError> {
        let body = buf.into_body();
        if body.is_empty() {
            return Err(PacketParseError::EmptyBuf);
        }

        let cmd = match body[0] {
            b'g' if body.len() == 1 => Command::g,
            b'G' => {
                let (_, rest) = body.split_at_mut(1);
                let vals = decode_hex_buf(rest).map_err(|_| MalformedCommand)?;
                Command::G { vals: &*vals }
            }
            b'p' => Command::p {
                reg: num(&body[1..])?,
            },
            b'P' => {
                let (head, rest) = split_once(&mut body[1..], b'=').ok_or(MalformedCommand)?;
                let reg = num(head)?;
                let val = decode_hex_buf(rest).map_err(|_| MalformedCommand)?;
                Command::P { reg, val: &*val }
            }
            b'm' => {
                let (addr, len) = addr_len(&body[1..])?;
                Command::m { addr, len }
            }
            b'M' => {
                let (head, rest) = split_once(&mut body[1..], b':').ok_or(MalformedCommand)?;
                let (addr, len) = addr_len(head)?;
                let val = decode_hex_buf(rest).map_err(|_| MalformedCommand)?;
                if val.len() as u64 != len {
                    return Err(MalformedCommand);
                }
                Command::M { addr, val: &*val }
            }
            b'x' => {
                let (addr, len) = addr_len(&body[1..])?;
                Command::x { addr, len }
            }
            b'X' => {
                // binary payload was already unescaped during frame decoding
                let (head, val) = split_once(&mut body[1..], b':').ok_or(MalformedCommand)?;
                let (addr, len) = addr_len(head)?;
                if val.len() as u64 != len {
                    return Err(MalformedCommand);
                }
                Command::X { addr, val: &*val }
            }
            b's' => Command::s {
                addr: opt_num(&body[1..])?,
            },
            b'c' => Command::c {
                addr: opt_num(&body[1..])?,
            },
            b'S' => {
                let (sig, addr) = sig_addr(&body[1..])?;
                Command::S { sig, addr }
            }
            b'C' => {
                let (sig, addr) = sig_addr(&body[1..])?;
                Command::C { sig, addr }
            }
            b'b' => match body.get(1) {
                Some(b'c') if body.len() == 2 => Command::bc,
                Some(b's') if body.len() == 2 => Command::bs,
                // the bare 'b' (set baud rate) packet is long deprecated
                _ => Command::Unknown,
            },
            b'?' if body.len() == 1 => Command::QuestionMark,
            b'H' => {
                let op = match body.get(1) {
                    Some(b'c') => HOp::StepContinue,
                    Some(b'g') => HOp::Other,
                    _ => return Err(MalformedCommand),
                };
                let thread =
                    ThreadId::try_from(&body[2..]).map_err(|()| MalformedCommand)?;
                Command::H { op, thread }
            }
            b'T' => Command::T {
                thread: ThreadId::try_from(&body[1..]).map_err(|()| MalformedCommand)?,
            },
            b'q' | b'Q' => parse_query(body)?,
            b'v' => parse_verbose(body)?,
            b'z' | b'Z' => {
                let insert = body[0] == b'Z';
                let mut fields = body[1..].split(|&b| b == b',');
                let type_: u8 = num(fields.next().ok_or(MalformedCommand)?)? as u8;
                let addr = num(fields.next().ok_or(MalformedCommand)?)?;
                let kind = num(fields.next().ok_or(MalformedCommand)?)?;
                // a trailing ";cmd_list" (bytecode conditions) is not supported
                if fields.next().is_some() {
                    return Ok(Command::Unknown);
                }
                if insert {
                    Command::Z { type_, addr, kind }
                } else {
                    Command::z { type_, addr, kind }
                }
            }
            b'!' if body.len() == 1 => Command::ExclamationMark,
            b'R' => Command::R,
            b'D' => Command::D,
            b'k' if body.len() == 1 => Command::k,
            _ => Command::Unknown,
        };

        Ok(cmd)
    }
}

fn parse_query(body: &mut [u8]) -> Result<Command<'_>, PacketParseError> {
    match &body[..] {
        b"qC" => return Ok(Command::qC),
        b"qfThreadInfo" => return Ok(Command::qfThreadInfo),
        b"qsThreadInfo" => return Ok(Command::qsThreadInfo),
        b"QStartNoAckMode" => return Ok(Command::QStartNoAckMode),
        b"QEnableErrorStrings" => return Ok(Command::QEnableErrorStrings),
        _ => {}
    }

    if body.starts_with(b"qRcmd,") {
        let cmd = decode_hex_buf(&mut body[6..]).map_err(|_| MalformedCommand)?;
        return Ok(Command::qRcmd { cmd: &*cmd });
    }

    if body.starts_with(b"qSupported") {
        let features = match body.get(10) {
            Some(b':') => &body[11..],
            None => &[],
            Some(_) => return Err(MalformedCommand),
        };
        return Ok(Command::qSupported { features });
    }

    if body.starts_with(b"qXfer:features:read:") {
        // qXfer:features:read:<annex>:<offset>,<len>
        let rest = &body[20..];
        let colon = rest
            .iter()
            .position(|&b| b == b':')
            .ok_or(MalformedCommand)?;
        let (annex, range) = (&rest[..colon], &rest[colon + 1..]);
        let (offset, len) = addr_len(range)?;
        return Ok(Command::qXferFeaturesRead { annex, offset, len });
    }

    if body.starts_with(b"qAttached") {
        return Ok(Command::qAttached);
    }

    Ok(Command::Unknown)
}

fn parse_verbose(body: &mut [u8]) -> Result<Command<'_>, PacketParseError> {
    match &body[..] {
        b"vCont?" => return Ok(Command::vCont_query),
        b"vCtrlC" => return Ok(Command::vCtrlC),
        _ => {}
    }

    if body.starts_with(b"vCont;") {
        let mut actions = Vec::new();
        for field in body[6..].split(|&b| b == b';') {
            if field.is_empty() {
                return Err(MalformedCommand);
            }
            let (spec, thread) = match field.iter().position(|&b| b == b':') {
                Some(pos) => {
                    let thread =
                        ThreadId::try_from(&field[pos + 1..]).map_err(|()| MalformedCommand)?;
                    (&field[..pos], Some(thread))
                }
                None => (field, None),
            };
            let kind = match spec {
                b"c" => VContKind::Continue,
                b"s" => VContKind::Step,
                [b'C', sig @ ..] => VContKind::ContinueWithSig(Signal(num(sig)? as u8)),
                [b'S', sig @ ..] => VContKind::StepWithSig(Signal(num(sig)? as u8)),
                // 't' (stop) and 'r' (range step) are not advertised
                _ => return Ok(Command::Unknown),
            };
            actions.push(VContAction { kind, thread });
        }
        if actions.is_empty() {
            return Err(MalformedCommand);
        }
        return Ok(Command::vCont { actions });
    }

    Ok(Command::Unknown)
}

fn num(buf: &[u8]) -> Result<u64, PacketParseError> {
    decode_hex(buf).map_err(|_| MalformedCommand)
}

fn opt_num(buf: &[u8]) -> Result<Option<u64>, PacketParseError> {
    if buf.is_empty() {
        Ok(None)
    } else {
        num(buf).map(Some)
    }
}

/// Parse `"<sig>[;<addr>]"` as used by the `S` and `C` packets.
fn sig_addr(buf: &[u8]) -> Result<(Signal, Option<u64>), PacketParseError> {
    let mut fields = buf.splitn(2, |&b| b == b';');
    let sig = Signal(num(fields.next().ok_or(MalformedCommand)?)? as u8);
    let addr = match fields.next() {
        Some(addr) => Some(num(addr)?),
        None => None,
    };
    Ok((sig, addr))
}

/// Parse `"<addr>,<len>"` as used by the memory access packets.
fn addr_len(buf: &[u8]) -> Result<(u64, u64), PacketParseError> {
    let mut fields = buf.splitn(2, |&b| b == b',');
    let addr = num(fields.next().ok_or(MalformedCommand)?)?;
    let len = num(fields.next().ok_or(MalformedCommand)?)?;
    Ok((addr, len))
}

fn split_once(buf: &mut [u8], sep: u8) -> Option<(&mut [u8], &mut [u8])> {
    let pos = buf.iter().position(|&b| b == sep)?;
    let (head, rest) = buf.split_at_mut(pos);
    Some((head, &mut rest[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &[u8]) -> Command<'_> {
        // leak a fresh buffer per call so the command can borrow from it
        let body: &mut [u8] = Box::leak(body.to_vec().into_boxed_slice());
        Command::from_packet(PacketBuf::new_with_raw_body(body)).unwrap()
    }

    #[test]
    fn memory_read() {
        assert_eq!(
            parse(b"m80000000,4"),
            Command::m {
                addr: 0x8000_0000,
                len: 4
            }
        );
    }

    #[test]
    fn memory_write_decodes_hex_in_place() {
        assert_eq!(
            parse(b"M80000000,2:beef"),
            Command::M {
                addr: 0x8000_0000,
                val: &[0xbe, 0xef]
            }
        );
    }

    #[test]
    fn memory_write_length_mismatch() {
        let body: &mut [u8] = Box::leak(b"M80000000,3:beef".to_vec().into_boxed_slice());
        assert!(Command::from_packet(PacketBuf::new_with_raw_body(body)).is_err());
    }

    #[test]
    fn single_register() {
        assert_eq!(parse(b"p20"), Command::p { reg: 0x20 });
        assert_eq!(
            parse(b"P5=0d000000"),
            Command::P {
                reg: 5,
                val: &[0x0d, 0, 0, 0]
            }
        );
    }

    #[test]
    fn step_and_continue() {
        assert_eq!(parse(b"s"), Command::s { addr: None });
        assert_eq!(
            parse(b"c80000000"),
            Command::c {
                addr: Some(0x8000_0000)
            }
        );
        assert_eq!(
            parse(b"C05"),
            Command::C {
                sig: Signal::SIGTRAP,
                addr: None
            }
        );
    }

    #[test]
    fn reverse_exec() {
        assert_eq!(parse(b"bc"), Command::bc);
        assert_eq!(parse(b"bs"), Command::bs);
        assert_eq!(parse(b"b"), Command::Unknown);
    }

    #[test]
    fn breakpoints() {
        assert_eq!(
            parse(b"Z1,80000100,4"),
            Command::Z {
                type_: 1,
                addr: 0x8000_0100,
                kind: 4
            }
        );
        assert_eq!(
            parse(b"z0,80000100,2"),
            Command::z {
                type_: 0,
                addr: 0x8000_0100,
                kind: 2
            }
        );
    }

    #[test]
    fn queries() {
        assert_eq!(
            parse(b"qSupported:multiprocess+;swbreak+"),
            Command::qSupported {
                features: b"multiprocess+;swbreak+"
            }
        );
        assert_eq!(parse(b"QStartNoAckMode"), Command::QStartNoAckMode);
        // "reset assert" hex-encoded
        assert_eq!(
            parse(b"qRcmd,726573657420617373657274"),
            Command::qRcmd {
                cmd: b"reset assert"
            }
        );
    }

    #[test]
    fn vcont() {
        assert_eq!(parse(b"vCont?"), Command::vCont_query);
        assert_eq!(
            parse(b"vCont;s:1;c"),
            Command::vCont {
                actions: vec![
                    VContAction {
                        kind: VContKind::Step,
                        thread: Some(ThreadId::try_from(b"1".as_slice()).unwrap()),
                    },
                    VContAction {
                        kind: VContKind::Continue,
                        thread: None,
                    },
                ]
            }
        );
    }

    #[test]
    fn qxfer_features_read() {
        assert_eq!(
            parse(b"qXfer:features:read:target.xml:80,1f4"),
            Command::qXferFeaturesRead {
                annex: b"target.xml",
                offset: 0x80,
                len: 0x1f4
            }
        );
    }

    #[test]
    fn unknown_commands_are_not_errors() {
        assert_eq!(parse(b"vMustReplyEmpty"), Command::Unknown);
        assert_eq!(parse(b"qXfer:memory-map:read::0,1000"), Command::Unknown);
    }
}
