/// Cross-platform signal numbers defined by the GDB Remote Serial Protocol.
///
/// Transcribed from <https://github.com/bminor/binutils-gdb/blob/master/include/gdb/signals.def>
/// (only the range a recorded-trace target can plausibly report).
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(pub u8);

#[rustfmt::skip]
impl Signal {
    #[doc = "Signal 0 (shouldn't be used)"] pub const SIGZERO: Self = Self(0);
    #[doc = "Hangup"]                       pub const SIGHUP:  Self = Self(1);
    #[doc = "Interrupt"]                    pub const SIGINT:  Self = Self(2);
    #[doc = "Quit"]                         pub const SIGQUIT: Self = Self(3);
    #[doc = "Illegal instruction"]          pub const SIGILL:  Self = Self(4);
    #[doc = "Trace/breakpoint trap"]        pub const SIGTRAP: Self = Self(5);
    #[doc = "Aborted"]                      pub const SIGABRT: Self = Self(6);
    #[doc = "Emulation trap"]               pub const SIGEMT:  Self = Self(7);
    #[doc = "Arithmetic exception"]         pub const SIGFPE:  Self = Self(8);
    #[doc = "Killed"]                       pub const SIGKILL: Self = Self(9);
    #[doc = "Bus error"]                    pub const SIGBUS:  Self = Self(10);
    #[doc = "Segmentation fault"]           pub const SIGSEGV: Self = Self(11);
    #[doc = "Bad system call"]              pub const SIGSYS:  Self = Self(12);
    #[doc = "Broken pipe"]                  pub const SIGPIPE: Self = Self(13);
    #[doc = "Alarm clock"]                  pub const SIGALRM: Self = Self(14);
    #[doc = "Terminated"]                   pub const SIGTERM: Self = Self(15);
    #[doc = "Urgent I/O condition"]         pub const SIGURG:  Self = Self(16);
    #[doc = "Stopped (signal)"]             pub const SIGSTOP: Self = Self(17);
}

impl core::fmt::Display for Signal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match *self {
            Signal::SIGZERO => "SIGZERO",
            Signal::SIGHUP => "SIGHUP",
            Signal::SIGINT => "SIGINT",
            Signal::SIGQUIT => "SIGQUIT",
            Signal::SIGILL => "SIGILL",
            Signal::SIGTRAP => "SIGTRAP",
            Signal::SIGABRT => "SIGABRT",
            Signal::SIGEMT => "SIGEMT",
            Signal::SIGFPE => "SIGFPE",
            Signal::SIGKILL => "SIGKILL",
            Signal::SIGBUS => "SIGBUS",
            Signal::SIGSEGV => "SIGSEGV",
            Signal::SIGSYS => "SIGSYS",
            Signal::SIGPIPE => "SIGPIPE",
            Signal::SIGALRM => "SIGALRM",
            Signal::SIGTERM => "SIGTERM",
            Signal::SIGURG => "SIGURG",
            Signal::SIGSTOP => "SIGSTOP",
            _ => return write!(f, "signal {}", self.0),
        };
        f.write_str(name)
    }
}
