//! Linux 串口传输（termios raw 模式 + poll 超时）
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - 只支持 termios 标准波特率（含 1M / 2M / 3M / 4M）
//! - RS485 方向控制由适配器硬件完成（U2D2 等），这里不处理

use super::Transport;
use crate::BusError;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, cfmakeraw, cfsetspeed, tcgetattr, tcsetattr,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};
use tracing::debug;

/// 串口传输
#[derive(Debug)]
pub struct SerialTransport {
    file: File,
    path: String,
}

impl SerialTransport {
    /// 以 raw 模式打开串口
    pub fn open(path: &str, baudrate: u32) -> Result<Self, BusError> {
        let speed = baud_rate(baudrate)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;

        let mut tio = tcgetattr(&file).map_err(io::Error::from)?;
        cfmakeraw(&mut tio);
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        tio.control_flags &= !(ControlFlags::CSTOPB | ControlFlags::CRTSCTS);
        cfsetspeed(&mut tio, speed).map_err(io::Error::from)?;
        tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(io::Error::from)?;
        termios::tcflush(&file, FlushArg::TCIOFLUSH).map_err(io::Error::from)?;

        debug!("Serial port {} configured at {} baud", path, baudrate);
        Ok(Self {
            file,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 等待文件描述符就绪；超时返回 `false`
    fn wait(&self, flags: PollFlags, timeout: Duration) -> io::Result<bool> {
        let ms = timeout.as_millis().clamp(1, u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.file.as_fd(), flags)];
        let ready = poll(&mut fds, PollTimeout::from(ms)).map_err(io::Error::from)?;
        Ok(ready > 0)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match self.file.write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.wait(PollFlags::POLLOUT, Duration::from_millis(100))? {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "serial port not writable",
                        ));
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !self.wait(PollFlags::POLLIN, deadline - now)? {
                break;
            }
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        termios::tcflush(&self.file, FlushArg::TCIFLUSH).map_err(io::Error::from)
    }
}

fn baud_rate(baudrate: u32) -> Result<BaudRate, BusError> {
    let rate = match baudrate {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        500_000 => BaudRate::B500000,
        576_000 => BaudRate::B576000,
        921_600 => BaudRate::B921600,
        1_000_000 => BaudRate::B1000000,
        2_000_000 => BaudRate::B2000000,
        3_000_000 => BaudRate::B3000000,
        4_000_000 => BaudRate::B4000000,
        other => {
            return Err(BusError::Config(format!(
                "unsupported serial baud rate {}",
                other
            )));
        },
    };
    Ok(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_mapping() {
        assert!(matches!(baud_rate(1_000_000), Ok(BaudRate::B1000000)));
        assert!(matches!(baud_rate(57_600), Ok(BaudRate::B57600)));
        assert!(matches!(baud_rate(12_345), Err(BusError::Config(_))));
    }

    #[test]
    fn test_open_missing_port() {
        let result = SerialTransport::open("/dev/roboglia-does-not-exist", 1_000_000);
        assert!(matches!(result, Err(BusError::Io(_))));
    }
}
