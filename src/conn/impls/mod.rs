mod boxed;
mod tcpstream;
#[cfg(unix)]
mod unixstream;
