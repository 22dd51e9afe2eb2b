//! Full debug sessions driven over an in-memory connection.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use tracedbg::arch::riscv::Rv32;
use tracedbg::conn::Connection;
use tracedbg::conn::ConnectionExt;
use tracedbg::dut::NullDut;
use tracedbg::shadow::AddressBlock;
use tracedbg::shadow::CoreConfig;
use tracedbg::shadow::ShadowSystem;
use tracedbg::shadow::SystemConfig;
use tracedbg::trace::Retired;
use tracedbg::trace::RetiredFor;
use tracedbg::trace::RetiredLsu;
use tracedbg::trace::RetiredReg;
use tracedbg::DebugStub;
use tracedbg::DisconnectReason;

/// Both ends of the wire in one object: a scripted input queue and a
/// captured output stream.
#[derive(Clone)]
struct PipeConn(Rc<RefCell<PipeInner>>);

struct PipeInner {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl PipeConn {
    fn new() -> Self {
        PipeConn(Rc::new(RefCell::new(PipeInner {
            input: VecDeque::new(),
            output: Vec::new(),
        })))
    }

    fn push_bytes(&self, bytes: &[u8]) {
        self.0.borrow_mut().input.extend(bytes.iter().copied());
    }

    fn output(&self) -> Vec<u8> {
        self.0.borrow().output.clone()
    }
}

impl Connection for PipeConn {
    type Error = io::Error;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.0.borrow_mut().output.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl ConnectionExt for PipeConn {
    fn read(&mut self) -> Result<u8, Self::Error> {
        self.0
            .borrow_mut()
            .input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        Ok(self.0.borrow().input.front().copied())
    }
}

/// Wrap a packet body in `$<body>#<xx>` framing.
fn frame(body: &str) -> Vec<u8> {
    let sum = body.bytes().fold(0u8, |a, b| a.wrapping_add(b));
    format!("${}#{:02x}", body, sum).into_bytes()
}

fn hex(text: &str) -> String {
    text.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// What the server put on the wire, split into tokens.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Ack,
    Nack,
    Packet(String),
}

fn parse_replies(out: &[u8]) -> Vec<Reply> {
    let mut replies = Vec::new();
    let mut i = 0;
    while i < out.len() {
        match out[i] {
            b'+' => {
                replies.push(Reply::Ack);
                i += 1;
            }
            b'-' => {
                replies.push(Reply::Nack);
                i += 1;
            }
            b'$' => {
                let end = out[i..]
                    .iter()
                    .position(|&b| b == b'#')
                    .map(|p| i + p + 3)
                    .expect("complete frame");
                replies.push(Reply::Packet(
                    String::from_utf8_lossy(&out[i..end]).into_owned(),
                ));
                i = end;
            }
            other => panic!("unexpected byte {:#04x} on the wire", other),
        }
    }
    replies
}

fn packets(out: &[u8]) -> Vec<String> {
    parse_replies(out)
        .into_iter()
        .filter_map(|r| match r {
            Reply::Packet(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn config() -> SystemConfig<u32> {
    SystemConfig::single_core(
        vec![AddressBlock {
            base: 0x8000_0000,
            size: 0x1_0000,
        }],
        vec![AddressBlock {
            base: 0x8001_0000,
            size: 0x1_0000,
        }],
    )
}

fn system(trace: Vec<RetiredFor<Rv32>>) -> ShadowSystem<Rv32> {
    ShadowSystem::new(&config(), trace).unwrap()
}

fn nop_at(adr: u32) -> RetiredFor<Rv32> {
    Retired::flow(0, adr, adr + 4, &[0x13, 0x00, 0x00, 0x00])
}

/// Run one scripted session; sessions end by detach, kill, or script
/// exhaustion.
fn run_session(sys: &mut ShadowSystem<Rv32>, script: &[Vec<u8>]) -> (Vec<u8>, Option<DisconnectReason>) {
    let conn = PipeConn::new();
    for part in script {
        conn.push_bytes(part);
    }
    let handle = conn.clone();
    let mut dut = NullDut;
    let reason = DebugStub::<Rv32, _>::new(conn).run(sys, &mut dut).ok();
    (handle.output(), reason)
}

#[test]
fn e1_read_all_registers() {
    let mut sys = system(vec![]);
    let (out, reason) = run_session(&mut sys, &[frame("g"), frame("k")]);

    let expected = "00000000".repeat(32 + 1);
    assert_eq!(packets(&out), vec![format!("${}#80", expected)]);
    assert_eq!(reason, Some(DisconnectReason::Kill));
}

#[test]
fn e2_memory_read() {
    let mut sys = system(vec![]);
    sys.mem_write(0, 0x8000_0000, &[0x13, 0x05, 0xa0, 0x02]).unwrap();

    let (out, _) = run_session(&mut sys, &[frame("m80000000,4"), frame("k")]);
    assert_eq!(packets(&out), vec!["$1305a002#bc".to_owned()]);
}

#[test]
fn e3_memory_write_then_read() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[frame("M80000000,2:beef"), frame("m80000000,2"), frame("k")],
    );
    assert_eq!(
        packets(&out),
        vec!["$OK#9a".to_owned(), "$beef#92".to_owned()]
    );
}

#[test]
fn e4_hw_breakpoint_stops_continue() {
    let trace = vec![
        nop_at(0x8000_00f8),
        nop_at(0x8000_00fc),
        nop_at(0x8000_0100),
        nop_at(0x8000_0104),
    ];
    let mut sys = system(trace);

    let (out, _) = run_session(
        &mut sys,
        &[frame("Z1,80000100,4"), frame("c"), frame("k")],
    );
    let packets = packets(&out);
    assert_eq!(packets[0], "$OK#9a");
    assert!(packets[1].starts_with("$T05hwbreak:;#"), "got {}", packets[1]);

    // the record at 0x80000100 was consumed
    assert_eq!(sys.cursor(), 3);
    assert_eq!(sys.core(0).unwrap().regs.pc(), 0x8000_0104);
}

#[test]
fn e5_reverse_step_at_beginning() {
    let mut sys = system(vec![nop_at(0x8000_0000)]);
    let (out, _) = run_session(&mut sys, &[frame("bs"), frame("k")]);

    assert!(
        packets(&out)[0].starts_with("$T05replaylog:begin;#"),
        "got {}",
        packets(&out)[0]
    );
    assert_eq!(sys.cursor(), 0);
}

#[test]
fn e6_qsupported_and_no_ack_mode() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[
            frame("qSupported:multiprocess+;swbreak+;hwbreak+;xmlRegisters=i386"),
            frame("QStartNoAckMode"),
            frame("m80000000,1"),
            frame("k"),
        ],
    );

    let replies = parse_replies(&out);

    // feature reply: server set advertised, no trailing semicolon
    let features = match &replies[1] {
        Reply::Packet(p) => p,
        other => panic!("expected feature reply, got {:?}", other),
    };
    for want in [
        "PacketSize=",
        ";swbreak+",
        ";hwbreak+",
        ";error-message+",
        ";ReverseStep+",
        ";ReverseContinue+",
        ";QStartNoAckMode+",
        ";multiprocess-",
        ";binary-upload-",
    ] {
        assert!(features.contains(want), "feature reply missing {}", want);
    }
    assert!(!features.contains(";#"), "trailing semicolon in {}", features);

    assert_eq!(replies[3], Reply::Packet("$OK#9a".to_owned()));

    // hysteresis: acks precede the OK, none after it
    let ok_pos = replies
        .iter()
        .position(|r| *r == Reply::Packet("$OK#9a".to_owned()))
        .unwrap();
    assert!(replies[..ok_pos].contains(&Reply::Ack));
    assert!(
        replies[ok_pos..].iter().all(|r| !matches!(r, Reply::Ack | Reply::Nack)),
        "control byte after no-ack mode: {:?}",
        replies
    );
}

#[test]
fn software_breakpoint_trap() {
    let trace = vec![
        nop_at(0x8000_0000),
        Retired::flow(0, 0x8000_0004, 0x8000_0008, &[0x73, 0x00, 0x10, 0x00]),
    ];
    let mut sys = system(trace);

    let (out, _) = run_session(&mut sys, &[frame("c"), frame("k")]);
    assert!(packets(&out)[0].starts_with("$T05swbreak:;#"));
}

#[test]
fn watchpoint_reports_address() {
    let mut store = nop_at(0x8000_0000);
    store.lsu = Some(RetiredLsu {
        adr: 0x8000_2000,
        rdt: vec![0, 0, 0, 0],
        wdt: vec![1, 2, 3, 4],
    });
    let mut sys = system(vec![store]);

    let (out, _) = run_session(
        &mut sys,
        &[frame("Z2,80002000,4"), frame("c"), frame("k")],
    );
    let packets = packets(&out);
    assert_eq!(packets[0], "$OK#9a");
    assert!(
        packets[1].starts_with("$T05watch:80002000;#"),
        "got {}",
        packets[1]
    );
}

#[test]
fn reverse_continue_restores_initial_state() {
    let mut r0 = nop_at(0x8000_0000);
    r0.gpr.push(RetiredReg {
        idx: 10,
        rdt: 0,
        wdt: 42,
    });
    let trace = vec![r0, nop_at(0x8000_0004), nop_at(0x8000_0008)];
    let mut sys = system(trace);
    let initial_regs = sys.reg_read_all(0).unwrap();

    let (out, _) = run_session(&mut sys, &[frame("c"), frame("bc"), frame("k")]);
    let packets = packets(&out);
    assert!(packets[0].starts_with("$T05replaylog:end;#"));
    assert!(packets[1].starts_with("$T05replaylog:begin;#"));

    assert_eq!(sys.cursor(), 0);
    assert_eq!(sys.reg_read_all(0).unwrap(), initial_regs);
}

#[test]
fn interrupt_byte_stops_continue() {
    // enough instructions to guarantee several poll windows
    let trace: Vec<_> = (0..4096u32).map(|i| nop_at(0x8000_0000 + i * 4)).collect();
    let mut sys = system(trace);

    let (out, _) = run_session(&mut sys, &[frame("c"), vec![0x03], frame("k")]);
    assert_eq!(packets(&out)[0], "$S02#b5");
    assert!(sys.cursor() < 4096, "interrupt did not stop the replay");
    assert!(sys.cursor() >= 1024, "stopped before the first poll window");
}

#[test]
fn step_reports_done() {
    let mut sys = system(vec![nop_at(0x8000_0000), nop_at(0x8000_0004)]);
    let (out, _) = run_session(&mut sys, &[frame("s"), frame("k")]);
    assert_eq!(packets(&out)[0], "$S05#b8");
    assert_eq!(sys.cursor(), 1);
}

#[test]
fn question_mark_repeats_last_stop() {
    let trace = vec![Retired::flow(
        0,
        0x8000_0000,
        0x8000_0004,
        &[0x73, 0x00, 0x10, 0x00],
    )];
    let mut sys = system(trace);

    let (out, _) = run_session(&mut sys, &[frame("c"), frame("?"), frame("k")]);
    let packets = packets(&out);
    assert_eq!(packets[0], packets[1]);
    assert!(packets[1].starts_with("$T05swbreak:;#"));
}

#[test]
fn unmapped_memory_read_is_an_error() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(&mut sys, &[frame("m90000000,4"), frame("k")]);
    // EFAULT, plain numeric form by default
    assert_eq!(packets(&out)[0], "$E0e#da");
}

#[test]
fn error_strings_after_negotiation() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[
            frame("QEnableErrorStrings"),
            frame("m90000000,4"),
            frame("k"),
        ],
    );
    let packets = packets(&out);
    assert_eq!(packets[0], "$OK#9a");
    let expected = format!("E0e;{}", hex("unmapped address 0x90000000"));
    assert!(packets[1].contains(&expected), "got {}", packets[1]);
}

#[test]
fn monitor_commands() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[
            frame(&format!("qRcmd,{}", hex("help"))),
            frame(&format!("qRcmd,{}", hex("set memory=dut"))),
            frame(&format!("qRcmd,{}", hex("frobnicate"))),
            frame("k"),
        ],
    );
    let packets = packets(&out);

    let help = &packets[0];
    assert!(help.contains(&hex("set waveform dump on|off")), "got {}", help);

    assert!(packets[1].contains(&hex("memory reads sourced from DUT")));
    assert!(packets[2].contains(&hex("monitor command not recognised")));
}

#[test]
fn thread_queries() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[
            frame("qfThreadInfo"),
            frame("qsThreadInfo"),
            frame("qC"),
            frame("Hg1"),
            frame("T1"),
            frame("k"),
        ],
    );
    assert_eq!(
        packets(&out),
        vec![
            "$m1#9e".to_owned(),
            "$l#6c".to_owned(),
            "$QC1#c5".to_owned(),
            "$OK#9a".to_owned(),
            "$OK#9a".to_owned(),
        ]
    );
}

#[test]
fn target_description_is_served_in_chunks() {
    let xml = r#"<target version="1.0"><architecture>riscv:rv32</architecture></target>"#;
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[
            frame("qXfer:features:read:target.xml:0,a"),
            frame(&format!("qXfer:features:read:target.xml:a,{:x}", xml.len())),
            frame("qXfer:features:read:bogus.xml:0,a"),
            frame("k"),
        ],
    );
    let packets = packets(&out);

    assert!(packets[0].starts_with(&format!("$m{}", &xml[..10])), "got {}", packets[0]);
    assert!(packets[1].starts_with(&format!("$l{}", &xml[10..])), "got {}", packets[1]);
    assert!(packets[2].starts_with("$E00"), "got {}", packets[2]);
}

#[test]
fn unknown_packets_get_the_empty_reply() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(&mut sys, &[frame("vMustReplyEmpty"), frame("k")]);
    assert_eq!(packets(&out)[0], "$#00");
}

#[test]
fn multicore_stop_replies_carry_thread_and_core() {
    let core = CoreConfig {
        mem: vec![AddressBlock {
            base: 0x8000_0000,
            size: 0x1_0000,
        }],
        i_o: vec![],
    };
    let config = SystemConfig {
        cores: vec![core.clone(), core],
        mem: vec![],
        i_o: vec![],
    };

    let mut r1 = nop_at(0x8000_0000);
    r1.hart = 1;
    let trace = vec![nop_at(0x8000_0000), r1];
    let mut sys = ShadowSystem::<Rv32>::new(&config, trace).unwrap();

    let (out, _) = run_session(&mut sys, &[frame("s"), frame("s"), frame("k")]);
    let packets = packets(&out);
    assert!(
        packets[0].starts_with("$T05thread:1;core:0;#"),
        "got {}",
        packets[0]
    );
    assert!(
        packets[1].starts_with("$T05thread:2;core:1;#"),
        "got {}",
        packets[1]
    );
}

#[test]
fn detach_preserves_shadow_state() {
    let mut sys = system(vec![]);

    let (out, reason) = run_session(
        &mut sys,
        &[frame("M80000000,2:beef"), frame("D")],
    );
    assert_eq!(
        packets(&out),
        vec!["$OK#9a".to_owned(), "$OK#9a".to_owned()]
    );
    assert_eq!(reason, Some(DisconnectReason::Detach));

    // a second session sees the first session's write
    let (out, _) = run_session(&mut sys, &[frame("m80000000,2"), frame("k")]);
    assert_eq!(packets(&out)[0], "$beef#92");
}

#[test]
fn checksum_mismatch_gets_nacked() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[b"$g#00".to_vec(), frame("g"), frame("k")],
    );
    let replies = parse_replies(&out);
    assert_eq!(replies[0], Reply::Nack);
    // the retransmission is served normally
    assert_eq!(replies[1], Reply::Ack);
}

#[test]
fn x0_writes_are_discarded() {
    let mut sys = system(vec![]);
    let (out, _) = run_session(
        &mut sys,
        &[frame("P0=efbeadde"), frame("p0"), frame("k")],
    );
    assert_eq!(
        packets(&out),
        vec!["$OK#9a".to_owned(), "$00000000#80".to_owned()]
    );
}
